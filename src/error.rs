//! Session-level error types.

use thiserror::Error;

use crate::state::Phase;

/// Errors that terminate a session.
///
/// Everything the protocol can recover from (parity failures, checksum
/// mismatches, lost packets) is recovered internally via NAK, RST or
/// retransmission and never surfaces here.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A send-and-await leg ran out of attempts. During the handshake this
    /// means the connection could not be established; in any later phase the
    /// session is abandoned and the peer is left to its own timeout.
    #[error("gave up after {attempts} attempts in phase {phase}")]
    RetriesExhausted { phase: Phase, attempts: u32 },

    /// The operation requires an established session.
    #[error("session is in phase {phase}, not established")]
    SessionClosed { phase: Phase },

    /// The underlying datagram transport failed.
    #[error("datagram channel error: {0}")]
    Channel(#[from] std::io::Error),

    /// The supplied [`crate::config::ProtocolConfig`] failed validation.
    #[error("invalid configuration: {0}")]
    Config(anyhow::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, TransportError>;
