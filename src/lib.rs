//! A reliable, half-duplex, stop-and-wait transport over unreliable
//! datagrams, modeled loosely on TCP.
//!
//! ## Design goals
//!
//! * The abstraction is a one-directional stream of *chunks*: the initiator
//!   submits byte chunks, the acceptor receives them in submission order.
//!   Acknowledgements are the only traffic flowing the other way.
//! * Strict lock-step: one packet is in flight at any time, and each side
//!   knows at every moment whether it is the designated sender or the
//!   designated waiter. There is no window, no reordering buffer and no
//!   congestion control - simplicity and determinism over throughput.
//! * Every defect the wire can produce - loss, duplication, corruption -
//!   is handled deterministically: per-frame parity catches corruption
//!   immediately (NAK), a running CRC-32 over the whole stream catches
//!   everything else at termination (RST + restart), and every
//!   send-and-await leg is bounded by an attempt budget.
//! * The datagram transport is an injected trait object
//!   ([`channel::DatagramChannel`]), as is the ISN source
//!   ([`random::IsnSource`]), so every failure mode is reproducible in
//!   tests. An in-memory fault-injecting implementation ships in
//!   [`simulator`].
//!
//! ## Frame layout
//!
//! All numbers in network byte order (BE):
//!
//! ```ascii
//! 0:  length (u32) - number of payload bytes; the whole frame is
//!      length + 10 bytes, and frames below 10 bytes are malformed
//! 4:  type (u8) - bit 3 separates control (set) from data (clear),
//!      bits 0-2 select the variety, the high nibble must be zero:
//!      * 0b0000 DATA          * 0b1000 SYN
//!      * 0b0001 RETRANSMIT    * 0b1001 SYN-ACK
//!                             * 0b1010 ACK
//!                             * 0b1011 NAK
//!                             * 0b1100 FIN
//!                             * 0b1101 RST
//!      all other values are invalid and dropped on receipt (never NAK'd)
//! 5:  sequence number (u32) - monotone per sender, starting at its ISN.
//!      Only the handshake correlates on it; the data phase ignores it
//! 9:  payload (length bytes) - chunk bytes, an ISN echo, or a CRC-32
//! *:  parity (u8) - 0x00 if the popcount of all preceding bytes is even,
//!      0x0F if it is odd. A frame whose trailer disagrees with its body
//!      failed parity: the data-phase receiver answers with a NAK, every
//!      other phase drops the frame
//! ```
//!
//! ## Connection establishment
//!
//! Three-way, with random ISNs and explicit echo verification:
//!
//! ```ascii
//! initiator                               acceptor
//!    | -- SYN, seq=cisn ------------------->  |
//!    | <-- SYN-ACK, seq=sisn, payload=cisn+1  |
//!    | -- ACK, seq=cisn+1, payload=sisn+1 -->  |
//! ```
//!
//! The final ACK is not acknowledged in turn; the acceptor confirms it
//! implicitly by ACKing the first data packet. If the ACK is lost, the
//! acceptor keeps retransmitting its SYN-ACK - and the initiator, which has
//! not yet had data acknowledged, answers each repetition with the same
//! handshake ACK until progress resumes.
//!
//! ## Data transfer
//!
//! One chunk per DATA packet, one ACK (or NAK, for parity failures) per
//! chunk. Lost or NAK'd chunks are retransmitted with the RETRANSMIT
//! marker; control packets retransmit byte-identically. Three consecutive
//! failures on any leg abandon the session. Both endpoints fold every
//! acknowledged/delivered chunk into a running CRC-32.
//!
//! ## Termination and reset
//!
//! The initiator's FIN announces its CRC-32 as the payload. If the
//! acceptor's own CRC agrees it answers ACK then FIN, and the initiator's
//! final ACK closes the session. If the CRCs disagree the acceptor answers
//! RST instead: the initiator then re-runs the handshake (fresh ISNs, reset
//! CRCs) and reports the restart to the application, which decides whether
//! to send the stream again.

pub mod channel;
mod checksum;
pub mod client;
pub mod config;
pub mod error;
pub mod packet;
pub mod random;
mod retry;
pub mod server;
pub mod simulator;
pub mod state;

pub use channel::{DatagramChannel, UdpChannel};
pub use client::{ClientSession, CloseOutcome};
pub use config::ProtocolConfig;
pub use error::{Result, TransportError};
pub use packet::{Packet, PacketKind};
pub use random::{IsnSource, ThreadRngIsn};
pub use server::{ServerEvent, ServerSession};
pub use state::Phase;
