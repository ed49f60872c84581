//! Connection phase types shared by both state machines.
//!
//! Transitions are *not* implemented here - they live in [`crate::client`]
//! and [`crate::server`] - but keeping the phase enum in its own module
//! makes it available to error types and tracing output without pulling in
//! session plumbing.

/// The phases a session moves through, from the perspective of one endpoint.
///
/// ```text
///                 client                          server
///
///  Closed ──SYN sent──▶ SynSent          Closed ──SYN rcvd──▶ SynReceived
///                          │                                      │
///               SYN-ACK    │                               ACK    │
///                          ▼                                      ▼
///                     Established ◀──── data / acks ────▶ Established
///                          │                                      │
///               FIN sent   │                            FIN rcvd  │
///                          ▼                                      ▼
///   ClosedOk ◀── FinWait ◀── FinSent                Closing ──▶ ClosedOk
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No connection exists; initial state, and the state after a declined
    /// restart.
    #[default]
    Closed,
    /// SYN sent; waiting for a SYN-ACK carrying `cisn + 1`.
    SynSent,
    /// SYN received and SYN-ACK sent; waiting for an ACK carrying `sisn + 1`.
    SynReceived,
    /// Handshake complete; data transfer in progress.
    Established,
    /// FIN sent; waiting for the peer's acknowledgement.
    FinSent,
    /// FIN acknowledged; waiting for the peer's own FIN (or a reset).
    FinWait,
    /// Peer's FIN received and answered; waiting for the final ACK.
    Closing,
    /// Session ended cleanly.
    ClosedOk,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
