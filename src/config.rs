use std::time::Duration;

use anyhow::bail;

/// Tunables shared by both state machines.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// How long one leg waits for the peer's reply before retransmitting.
    ///
    /// The protocol is lock-step, so this value bounds progress directly:
    /// every chunk costs at least one round trip, and a reply that does not
    /// arrive within this window counts as a failed attempt. Choose a value
    /// that dwarfs the one-way latency of the link; 200 ms is comfortable
    /// for loopback and LAN use.
    pub reply_timeout: Duration,

    /// Transmissions per leg (the initial send plus retransmits). A leg that
    /// fails this many times in a row abandons the session.
    pub max_attempts: u32,

    /// The largest datagram the channel will deliver. Frames above this size
    /// are truncated by the receive buffer and then rejected by the codec's
    /// length check, so the value effectively caps the chunk size.
    pub max_datagram_size: usize,
}

impl ProtocolConfig {
    /// Defaults suitable for loopback and LAN links.
    pub fn default_lan() -> ProtocolConfig {
        ProtocolConfig {
            reply_timeout: Duration::from_millis(200),
            max_attempts: 3,
            max_datagram_size: 64 * 1024,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reply_timeout.is_zero() {
            bail!("reply timeout must be non-zero");
        }
        if self.max_attempts == 0 {
            bail!("at least one attempt per leg is required");
        }
        if self.max_datagram_size < crate::packet::MIN_FRAME_LEN {
            bail!(
                "max datagram size {} cannot hold a minimum frame of {} bytes",
                self.max_datagram_size,
                crate::packet::MIN_FRAME_LEN
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ProtocolConfig::default_lan().validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = ProtocolConfig::default_lan();
        config.reply_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut config = ProtocolConfig::default_lan();
        config.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tiny_datagram_size_is_rejected() {
        let mut config = ProtocolConfig::default_lan();
        config.max_datagram_size = 9;
        assert!(config.validate().is_err());
    }
}
