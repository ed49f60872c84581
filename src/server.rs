use std::sync::Arc;

use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::channel::DatagramChannel;
use crate::checksum::RunningCrc;
use crate::config::ProtocolConfig;
use crate::error::{Result, TransportError};
use crate::packet::{DecodeError, Packet, PacketKind};
use crate::random::IsnSource;
use crate::retry::{RetryBudget, RetryController, Verdict};
use crate::state::Phase;

/// What one [`ServerSession::recv`] call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// One delivered chunk, in submission order.
    Chunk(Vec<u8>),
    /// The stream ended and its checksum matched; no more chunks will come.
    EndOfStream,
    /// The stream ended but the peer's checksum announcement disagreed with
    /// the bytes that were delivered - some earlier chunk was corrupted or
    /// duplicated in transit. With `resumed`, the peer has re-established
    /// the connection and will send the stream again (delivered on
    /// subsequent `recv` calls); otherwise it acknowledged the reset and
    /// walked away.
    ChecksumMismatch { resumed: bool },
}

/// The passive endpoint: accepts a connection, delivers chunks in lock-step,
/// acknowledges the end of the stream.
pub struct ServerSession {
    channel: Arc<dyn DatagramChannel>,
    isns: Arc<dyn IsnSource>,
    config: Arc<ProtocolConfig>,
    retry: RetryController,
    session_id: Uuid,
    phase: Phase,
    /// Monotone per-frame counter, mirroring the peer's. Never inspected by
    /// the peer outside the handshake.
    next_seq: u32,
    /// The reply the peer most recently should have seen. The peer is the
    /// designated sender during the data phase, so a quiet window means this
    /// packet may have been lost; it is retransmitted as-is. Right after the
    /// handshake this is the SYN-ACK.
    last_control: Packet,
    inbound_crc: RunningCrc,
}

impl ServerSession {
    /// Wait for a connection attempt (indefinitely - listening is not a
    /// send-and-await leg) and complete the handshake.
    pub async fn accept(
        channel: Arc<dyn DatagramChannel>,
        isns: Arc<dyn IsnSource>,
        config: Arc<ProtocolConfig>,
    ) -> Result<ServerSession> {
        config.validate().map_err(TransportError::Config)?;

        let mut session = ServerSession {
            retry: RetryController::new(&config),
            channel,
            isns,
            config,
            session_id: Uuid::new_v4(),
            phase: Phase::Closed,
            next_seq: 0,
            last_control: Packet::ack(0),
            inbound_crc: RunningCrc::new(),
        };

        let syn = session.await_syn().await?;
        session.complete_handshake(syn.sequence_no).await?;
        Ok(session)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    async fn await_syn(&self) -> Result<Packet> {
        debug!("session {}: listening", self.session_id);
        loop {
            let Some(frame) = self
                .channel
                .recv_datagram(self.config.reply_timeout)
                .await?
            else {
                continue;
            };
            match Packet::decode(&frame) {
                Ok(packet) if packet.kind == PacketKind::Syn => return Ok(packet),
                Ok(packet) => trace!("ignoring {:?} while listening", packet.kind),
                Err(e) => trace!("dropping undecodable frame while listening: {}", e),
            }
        }
    }

    /// SYN-ACK ⇄ ACK. Also used to re-establish after a reset, when the
    /// peer restarts with a fresh SYN.
    async fn complete_handshake(&mut self, cisn: u32) -> Result<()> {
        let sisn = self.isns.next_isn();
        let syn_ack = Packet::syn_ack(sisn, cisn);
        self.phase = Phase::SynReceived;
        debug!(
            "session {}: SYN with isn {:#010x}, answering with isn {:#010x}",
            self.session_id, cisn, sisn
        );

        let repeat = syn_ack.clone();
        let result = self
            .retry
            .exchange(
                self.channel.as_ref(),
                Phase::SynReceived,
                &syn_ack,
                &syn_ack,
                |packet| match packet.kind {
                    PacketKind::Ack
                        if packet.payload_scalar() == Some(sisn.wrapping_add(1)) =>
                    {
                        Verdict::Accept
                    }
                    // the peer did not see our SYN-ACK and sent its SYN again
                    PacketKind::Syn if packet.sequence_no == cisn => {
                        Verdict::Answer(repeat.clone())
                    }
                    // anything else - including data from a peer that thinks
                    // the handshake is done - is not the ACK we need
                    _ => Verdict::Ignore,
                },
            )
            .await;
        self.guard(result)?;

        self.phase = Phase::Established;
        self.next_seq = sisn.wrapping_add(1);
        self.inbound_crc.reset();
        // a quiet window before the first chunk means the peer is still
        // waiting for this
        self.last_control = syn_ack;
        info!("session {}: established, peer isn {:#010x}", self.session_id, cisn);
        Ok(())
    }

    /// Deliver the next chunk, or report how the stream ended.
    pub async fn recv(&mut self) -> Result<ServerEvent> {
        match self.phase {
            Phase::Established => {}
            Phase::ClosedOk => return Ok(ServerEvent::EndOfStream),
            phase => return Err(TransportError::SessionClosed { phase }),
        }

        let mut budget = RetryBudget::new(self.config.max_attempts);
        loop {
            let Some(frame) = self.receive().await? else {
                // the peer is the designated sender; silence means our last
                // reply may have been lost
                self.guard(budget.spend(Phase::Established))?;
                let repeat = self.last_control.clone();
                self.transmit(&repeat).await?;
                continue;
            };

            match Packet::decode(&frame) {
                Err(DecodeError::Parity { .. }) => {
                    debug!("session {}: parity failure, answering with NAK", self.session_id);
                    self.guard(budget.spend(Phase::Established))?;
                    let nak = Packet::nak(self.take_seq());
                    self.transmit(&nak).await?;
                    self.last_control = nak;
                }
                Err(e) => trace!("session {}: dropping frame: {}", self.session_id, e),
                Ok(packet) => match packet.kind {
                    PacketKind::Data | PacketKind::Retransmit => {
                        self.inbound_crc.fold(&packet.payload);
                        let ack = Packet::ack(self.take_seq());
                        self.transmit(&ack).await?;
                        self.last_control = ack;
                        trace!(
                            "session {}: delivering chunk of {} bytes",
                            self.session_id,
                            packet.payload.len()
                        );
                        return Ok(ServerEvent::Chunk(packet.payload));
                    }
                    PacketKind::Fin => return self.handle_fin(&packet).await,
                    kind => trace!("session {}: ignoring {:?}", self.session_id, kind),
                },
            }
        }
    }

    async fn handle_fin(&mut self, fin: &Packet) -> Result<ServerEvent> {
        self.phase = Phase::Closing;
        let expected = self.inbound_crc.value();
        let declared = fin.payload_scalar();

        if declared == Some(expected) {
            debug!("session {}: FIN, checksum {:#010x} confirmed", self.session_id, expected);
            self.finish_stream().await
        } else {
            debug!(
                "session {}: FIN announces {:?} but delivered bytes hash to {:#010x} - resetting",
                self.session_id, declared, expected
            );
            self.reset_stream().await
        }
    }

    /// The checksums agree: ACK the peer's FIN, send our own, await the
    /// final ACK.
    async fn finish_stream(&mut self) -> Result<ServerEvent> {
        let ack = Packet::ack(self.take_seq());
        let fin = Packet::fin(self.take_seq(), self.inbound_crc.value());
        self.transmit(&ack).await?;
        self.transmit(&fin).await?;

        let mut budget = RetryBudget::new(self.config.max_attempts);
        loop {
            match self.receive().await? {
                None => {
                    self.guard(budget.spend(Phase::Closing))?;
                    self.transmit(&fin).await?;
                }
                Some(frame) => match Packet::decode(&frame) {
                    Ok(packet) if packet.kind == PacketKind::Ack => {
                        self.phase = Phase::ClosedOk;
                        info!("session {}: closed", self.session_id);
                        return Ok(ServerEvent::EndOfStream);
                    }
                    Ok(packet) if packet.kind == PacketKind::Fin => {
                        // our ACK was lost and the peer is still announcing
                        // its end; repeat both legs
                        self.guard(budget.spend(Phase::Closing))?;
                        self.transmit(&ack).await?;
                        self.transmit(&fin).await?;
                    }
                    Ok(packet) => trace!("ignoring {:?} while closing", packet.kind),
                    Err(e) => trace!("dropping frame while closing: {}", e),
                },
            }
        }
    }

    /// The checksums disagree: reset, then wait for the peer to either
    /// restart (fresh SYN) or acknowledge and give up.
    async fn reset_stream(&mut self) -> Result<ServerEvent> {
        let rst = Packet::rst(self.take_seq());
        self.transmit(&rst).await?;

        let mut budget = RetryBudget::new(self.config.max_attempts);
        loop {
            match self.receive().await? {
                None => {
                    self.guard(budget.spend(Phase::Closing))?;
                    self.transmit(&rst).await?;
                }
                Some(frame) => match Packet::decode(&frame) {
                    Ok(packet) if packet.kind == PacketKind::Syn => {
                        debug!("session {}: peer restarts after reset", self.session_id);
                        self.complete_handshake(packet.sequence_no).await?;
                        return Ok(ServerEvent::ChecksumMismatch { resumed: true });
                    }
                    Ok(packet) if packet.kind == PacketKind::Ack => {
                        debug!("session {}: peer acknowledged reset and gave up", self.session_id);
                        self.phase = Phase::Closed;
                        return Ok(ServerEvent::ChecksumMismatch { resumed: false });
                    }
                    Ok(packet) if packet.kind == PacketKind::Fin => {
                        // the peer has not seen the reset and retransmits
                        // its FIN
                        self.guard(budget.spend(Phase::Closing))?;
                        self.transmit(&rst).await?;
                    }
                    Ok(packet) => trace!("ignoring {:?} after reset", packet.kind),
                    Err(e) => trace!("dropping frame after reset: {}", e),
                },
            }
        }
    }

    fn take_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    async fn transmit(&mut self, packet: &Packet) -> Result<()> {
        if let Err(e) = self.channel.send_datagram(&packet.encode()).await {
            self.phase = Phase::Closed;
            return Err(e.into());
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        match self
            .channel
            .recv_datagram(self.config.reply_timeout)
            .await
        {
            Ok(frame) => Ok(frame),
            Err(e) => {
                self.phase = Phase::Closed;
                Err(e.into())
            }
        }
    }

    /// A fatal error leaves the session unusable; record that before
    /// handing the error up.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.phase = Phase::Closed;
        }
        result
    }
}
