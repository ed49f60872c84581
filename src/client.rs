use std::sync::Arc;

use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::channel::DatagramChannel;
use crate::checksum::RunningCrc;
use crate::config::ProtocolConfig;
use crate::error::{Result, TransportError};
use crate::packet::{Packet, PacketKind};
use crate::random::IsnSource;
use crate::retry::{RetryController, Verdict};
use crate::state::Phase;

/// How a close attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The stream was acknowledged end to end; the session is finished.
    Closed,
    /// The peer's checksum did not match and it reset the connection. The
    /// session has already re-run the handshake and is established again
    /// with a fresh checksum; `bytes_sent` is how much payload this side
    /// believes it delivered before the reset. Whether to send the data
    /// again or drop the session is the caller's decision.
    RestartRequired { bytes_sent: u64 },
}

/// The initiating endpoint: connects, sends chunks in lock-step, closes.
///
/// One chunk is in flight at any time; [`ClientSession::send`] returns once
/// the chunk is acknowledged. The session owns its channel endpoint
/// exclusively.
pub struct ClientSession {
    channel: Arc<dyn DatagramChannel>,
    isns: Arc<dyn IsnSource>,
    config: Arc<ProtocolConfig>,
    retry: RetryController,
    session_id: Uuid,
    phase: Phase,
    /// Next value of the monotone per-frame counter. Receivers never
    /// inspect it outside the handshake.
    next_seq: u32,
    /// The third handshake leg, kept around because the peer may ask for it
    /// again: if its copy got lost, it answers the first data packet with a
    /// repeated SYN-ACK instead of an ACK.
    handshake_ack: Packet,
    /// Whether any data chunk has been acknowledged since the (re)handshake.
    /// Once true, stray SYN-ACKs are ignored instead of re-answered.
    first_data_sent: bool,
    outbound_crc: RunningCrc,
    bytes_sent: u64,
}

impl ClientSession {
    /// Run the connect handshake and return an established session.
    pub async fn connect(
        channel: Arc<dyn DatagramChannel>,
        isns: Arc<dyn IsnSource>,
        config: Arc<ProtocolConfig>,
    ) -> Result<ClientSession> {
        config.validate().map_err(TransportError::Config)?;

        let mut session = ClientSession {
            retry: RetryController::new(&config),
            channel,
            isns,
            config,
            session_id: Uuid::new_v4(),
            phase: Phase::Closed,
            next_seq: 0,
            handshake_ack: Packet::ack(0),
            first_data_sent: false,
            outbound_crc: RunningCrc::new(),
            bytes_sent: 0,
        };
        session.run_handshake().await?;
        Ok(session)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// SYN ⇄ SYN-ACK, then the unconfirmed ACK. Used both for the initial
    /// connect and for the restart after a reset.
    async fn run_handshake(&mut self) -> Result<()> {
        let cisn = self.isns.next_isn();
        let syn = Packet::syn(cisn);
        self.phase = Phase::SynSent;
        debug!("session {}: sending SYN with isn {:#010x}", self.session_id, cisn);

        let result = self
            .retry
            .exchange(self.channel.as_ref(), Phase::SynSent, &syn, &syn, |packet| {
                match packet.kind {
                    PacketKind::SynAck if packet.payload_scalar() == Some(cisn.wrapping_add(1)) => {
                        Verdict::Accept
                    }
                    _ => Verdict::Ignore,
                }
            })
            .await;
        let reply = self.guard(result)?;

        let sisn = reply.sequence_no;
        let handshake_ack = Packet::handshake_ack(cisn, sisn);
        // no confirmation leg: the peer confirms implicitly by accepting
        // the first data packet
        if let Err(e) = self.channel.send_datagram(&handshake_ack.encode()).await {
            self.phase = Phase::Closed;
            return Err(e.into());
        }

        self.phase = Phase::Established;
        self.next_seq = cisn.wrapping_add(2);
        self.handshake_ack = handshake_ack;
        self.first_data_sent = false;
        self.outbound_crc.reset();
        self.bytes_sent = 0;
        info!("session {}: established, peer isn {:#010x}", self.session_id, sisn);
        Ok(())
    }

    /// Transmit one chunk and wait for its acknowledgement.
    pub async fn send(&mut self, chunk: &[u8]) -> Result<()> {
        if self.phase != Phase::Established {
            return Err(TransportError::SessionClosed { phase: self.phase });
        }

        let data = Packet::data(self.next_seq, chunk);
        let rexmit = Packet::retransmit(self.next_seq, chunk);
        let first_data_sent = self.first_data_sent;
        let handshake_ack = self.handshake_ack.clone();

        let result = self
            .retry
            .exchange(
                self.channel.as_ref(),
                Phase::Established,
                &data,
                &rexmit,
                |packet| match packet.kind {
                    PacketKind::Ack => Verdict::Accept,
                    // parity failure at the peer: counts against the same
                    // budget as a timeout
                    PacketKind::Nak => Verdict::Reject,
                    // the peer never saw our handshake ACK and is still
                    // asking for it
                    PacketKind::SynAck if !first_data_sent => {
                        Verdict::Answer(handshake_ack.clone())
                    }
                    _ => Verdict::Ignore,
                },
            )
            .await;
        self.guard(result)?;

        self.outbound_crc.fold(chunk);
        self.bytes_sent += chunk.len() as u64;
        self.first_data_sent = true;
        self.next_seq = self.next_seq.wrapping_add(1);
        trace!("session {}: chunk of {} bytes acknowledged", self.session_id, chunk.len());
        Ok(())
    }

    /// Announce the end of the stream and run the termination exchange.
    pub async fn close(&mut self) -> Result<CloseOutcome> {
        match self.phase {
            Phase::Established => {}
            Phase::ClosedOk => return Ok(CloseOutcome::Closed),
            phase => return Err(TransportError::SessionClosed { phase }),
        }

        let fin = Packet::fin(self.next_seq, self.outbound_crc.value());
        self.next_seq = self.next_seq.wrapping_add(1);
        self.phase = Phase::FinSent;
        debug!(
            "session {}: sending FIN, checksum {:#010x} over {} bytes",
            self.session_id,
            self.outbound_crc.value(),
            self.bytes_sent
        );

        let result = self
            .retry
            .exchange(
                self.channel.as_ref(),
                Phase::FinSent,
                &fin,
                &fin,
                |packet| match packet.kind {
                    PacketKind::Ack | PacketKind::Fin | PacketKind::Rst => Verdict::Accept,
                    _ => Verdict::Ignore,
                },
            )
            .await;
        let reply = self.guard(result)?;

        let terminal = if reply.kind == PacketKind::Ack {
            // our FIN is acknowledged; now the peer announces its own end
            self.phase = Phase::FinWait;
            let result = self
                .retry
                .listen(self.channel.as_ref(), Phase::FinWait, |packet| {
                    match packet.kind {
                        PacketKind::Fin | PacketKind::Rst => Verdict::Accept,
                        _ => Verdict::Ignore,
                    }
                })
                .await;
            self.guard(result)?
        } else {
            // the acknowledgement was lost but the peer has already moved
            // on (FIN), or it reset (RST)
            reply
        };

        match terminal.kind {
            PacketKind::Fin => {
                self.acknowledge_peer_fin().await?;
                Ok(CloseOutcome::Closed)
            }
            PacketKind::Rst => {
                let bytes_sent = self.bytes_sent;
                debug!(
                    "session {}: peer reset after checksum mismatch ({} bytes sent), restarting",
                    self.session_id, bytes_sent
                );
                self.phase = Phase::Closed;
                self.run_handshake().await?;
                Ok(CloseOutcome::RestartRequired { bytes_sent })
            }
            _ => unreachable!("classifier only accepts FIN and RST"),
        }
    }

    /// Send the final ACK, then answer retransmitted FINs (the peer asking
    /// again because the ACK got lost) until the first quiet window.
    async fn acknowledge_peer_fin(&mut self) -> Result<()> {
        let final_ack = Packet::ack(self.next_seq);
        self.channel.send_datagram(&final_ack.encode()).await?;

        for _ in 0..self.config.max_attempts {
            match self
                .channel
                .recv_datagram(self.config.reply_timeout)
                .await?
            {
                None => break,
                Some(frame) => match Packet::decode(&frame) {
                    Ok(packet) if packet.kind == PacketKind::Fin => {
                        trace!("session {}: re-answering retransmitted FIN", self.session_id);
                        self.channel.send_datagram(&final_ack.encode()).await?;
                    }
                    _ => {}
                },
            }
        }

        self.phase = Phase::ClosedOk;
        info!("session {}: closed, {} bytes sent", self.session_id, self.bytes_sent);
        Ok(())
    }

    /// A fatal error leaves the session unusable; record that before
    /// handing the error up.
    fn guard(&mut self, result: Result<Packet>) -> Result<Packet> {
        if result.is_err() {
            self.phase = Phase::Closed;
        }
        result
    }
}
