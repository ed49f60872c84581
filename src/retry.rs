//! The send-and-await discipline every protocol leg is built on.
//!
//! A *leg* is one "transmit a packet, wait for an acceptable reply" round.
//! The caller decides which replies are acceptable via a classification
//! callback; this module owns the timers and the attempt bookkeeping, so no
//! state machine counts retries on its own.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::channel::DatagramChannel;
use crate::config::ProtocolConfig;
use crate::error::TransportError;
use crate::packet::Packet;
use crate::state::Phase;

/// What a leg should do with a decoded reply.
pub(crate) enum Verdict {
    /// The reply the leg was waiting for; the leg is complete.
    Accept,
    /// Not relevant in this phase. Keep waiting; the frame only consumes
    /// the part of the timeout window that has already elapsed.
    Ignore,
    /// A negative outcome (e.g. a NAK). Consumes an attempt and triggers a
    /// retransmission, exactly like a timeout.
    Reject,
    /// Send the contained packet - typically repeating an earlier control
    /// packet the peer evidently missed - and keep waiting without consuming
    /// an attempt.
    Answer(Packet),
}

/// Drives legs: transmit, await a classified reply, retransmit on failure,
/// give up after the configured number of attempts.
pub(crate) struct RetryController {
    reply_timeout: Duration,
    max_attempts: u32,
}

impl RetryController {
    pub fn new(config: &ProtocolConfig) -> RetryController {
        RetryController {
            reply_timeout: config.reply_timeout,
            max_attempts: config.max_attempts,
        }
    }

    /// Run a full leg: send `first`, then await a reply accepted by
    /// `classify`. Timeouts and rejections retransmit `retransmit` (the
    /// same bytes as `first` for control packets; the retransmission
    /// variant for data).
    pub async fn exchange(
        &self,
        channel: &dyn DatagramChannel,
        phase: Phase,
        first: &Packet,
        retransmit: &Packet,
        classify: impl FnMut(&Packet) -> Verdict,
    ) -> Result<Packet, TransportError> {
        channel.send_datagram(&first.encode()).await?;
        self.drive(channel, phase, Some(retransmit), classify).await
    }

    /// Await-only variant for phases with nothing outstanding to retransmit;
    /// quiet windows still consume attempts.
    pub async fn listen(
        &self,
        channel: &dyn DatagramChannel,
        phase: Phase,
        classify: impl FnMut(&Packet) -> Verdict,
    ) -> Result<Packet, TransportError> {
        self.drive(channel, phase, None, classify).await
    }

    async fn drive(
        &self,
        channel: &dyn DatagramChannel,
        phase: Phase,
        retransmit: Option<&Packet>,
        mut classify: impl FnMut(&Packet) -> Verdict,
    ) -> Result<Packet, TransportError> {
        let mut budget = RetryBudget::new(self.max_attempts);
        loop {
            let deadline = Instant::now() + self.reply_timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let Some(frame) = channel.recv_datagram(remaining).await? else {
                    trace!("no reply within {:?} in phase {}", self.reply_timeout, phase);
                    break;
                };
                let packet = match Packet::decode(&frame) {
                    Ok(packet) => packet,
                    Err(e) => {
                        trace!("dropping undecodable frame in phase {}: {}", phase, e);
                        continue;
                    }
                };
                match classify(&packet) {
                    Verdict::Accept => return Ok(packet),
                    Verdict::Ignore => {
                        trace!("ignoring {:?} in phase {}", packet.kind, phase);
                        continue;
                    }
                    Verdict::Answer(answer) => {
                        debug!("answering {:?} with {:?} in phase {}", packet.kind, answer.kind, phase);
                        channel.send_datagram(&answer.encode()).await?;
                        continue;
                    }
                    Verdict::Reject => {
                        trace!("negative reply {:?} in phase {}", packet.kind, phase);
                        break;
                    }
                }
            }

            budget.spend(phase)?;
            if let Some(packet) = retransmit {
                channel.send_datagram(&packet.encode()).await?;
            }
        }
    }
}

/// Bare attempts counter for legs that drive the channel themselves (the
/// passive side's data pump changes its retransmitted control packet
/// mid-leg, which does not fit the `exchange` shape).
pub(crate) struct RetryBudget {
    failures: u32,
    max_attempts: u32,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> RetryBudget {
        RetryBudget {
            failures: 0,
            max_attempts,
        }
    }

    /// Record one failed wait. `Ok` means the caller may retransmit and wait
    /// again; the error is returned once the whole budget is spent.
    pub fn spend(&mut self, phase: Phase) -> Result<(), TransportError> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            debug!("attempt budget exhausted in phase {}", phase);
            Err(TransportError::RetriesExhausted {
                phase,
                attempts: self.failures,
            })
        } else {
            Ok(())
        }
    }
}
