use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Frame size of an empty-payload packet: `length` (4) + `type` (1) +
/// `sequence_no` (4) + `parity` (1). Anything shorter cannot be a frame.
pub const MIN_FRAME_LEN: usize = 10;

/// Offset of the first payload byte inside a frame.
const PAYLOAD_OFFSET: usize = 9;

/// Parity trailer for a frame body with an even number of 1-bits.
pub const PARITY_EVEN: u8 = 0x00;
/// Parity trailer for a frame body with an odd number of 1-bits.
pub const PARITY_ODD: u8 = 0x0F;

/// The kinds of packet on the wire, i.e. the defined values of the `type`
/// byte. Bit 3 separates the control subfamily (set) from the data
/// subfamily (clear); the high nibble is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Application payload.
    Data = 0b0000,
    /// Application payload sent again after a NAK or a reply timeout.
    Retransmit = 0b0001,
    /// Handshake initiation; `sequence_no` carries the initiator's ISN.
    Syn = 0b1000,
    /// Handshake reply; `sequence_no` carries the acceptor's ISN, the
    /// payload echoes the initiator's ISN + 1.
    SynAck = 0b1001,
    /// Positive acknowledgement. In the handshake the payload echoes the
    /// acceptor's ISN + 1; elsewhere the payload is empty.
    Ack = 0b1010,
    /// Negative acknowledgement, sent only for parity failures during the
    /// data phase.
    Nak = 0b1011,
    /// End of stream; the payload carries the sender's running CRC-32.
    Fin = 0b1100,
    /// Reset after a checksum mismatch.
    Rst = 0b1101,
}

impl PacketKind {
    /// Maps a wire `type` byte to a kind. All eight undefined low-nibble
    /// values and every non-zero high nibble yield `None`; such frames are
    /// discarded by every phase (never NAK'd).
    pub fn from_wire(raw: u8) -> Option<PacketKind> {
        match raw {
            0b0000 => Some(PacketKind::Data),
            0b0001 => Some(PacketKind::Retransmit),
            0b1000 => Some(PacketKind::Syn),
            0b1001 => Some(PacketKind::SynAck),
            0b1010 => Some(PacketKind::Ack),
            0b1011 => Some(PacketKind::Nak),
            0b1100 => Some(PacketKind::Fin),
            0b1101 => Some(PacketKind::Rst),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        (self as u8) & 0b1000 != 0
    }
}

/// One wire frame. Immutable once constructed; `length` and the parity
/// trailer are derived during [`Packet::encode`] so they can never disagree
/// with the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub sequence_no: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn syn(cisn: u32) -> Packet {
        Packet {
            kind: PacketKind::Syn,
            sequence_no: cisn,
            payload: Vec::new(),
        }
    }

    pub fn syn_ack(sisn: u32, cisn: u32) -> Packet {
        Packet {
            kind: PacketKind::SynAck,
            sequence_no: sisn,
            payload: cisn.wrapping_add(1).to_be_bytes().to_vec(),
        }
    }

    /// The third handshake leg: numbered `cisn + 1`, echoing `sisn + 1`.
    pub fn handshake_ack(cisn: u32, sisn: u32) -> Packet {
        Packet {
            kind: PacketKind::Ack,
            sequence_no: cisn.wrapping_add(1),
            payload: sisn.wrapping_add(1).to_be_bytes().to_vec(),
        }
    }

    pub fn data(sequence_no: u32, chunk: &[u8]) -> Packet {
        Packet {
            kind: PacketKind::Data,
            sequence_no,
            payload: chunk.to_vec(),
        }
    }

    pub fn retransmit(sequence_no: u32, chunk: &[u8]) -> Packet {
        Packet {
            kind: PacketKind::Retransmit,
            sequence_no,
            payload: chunk.to_vec(),
        }
    }

    pub fn ack(sequence_no: u32) -> Packet {
        Packet {
            kind: PacketKind::Ack,
            sequence_no,
            payload: Vec::new(),
        }
    }

    pub fn nak(sequence_no: u32) -> Packet {
        Packet {
            kind: PacketKind::Nak,
            sequence_no,
            payload: Vec::new(),
        }
    }

    pub fn fin(sequence_no: u32, checksum: u32) -> Packet {
        Packet {
            kind: PacketKind::Fin,
            sequence_no,
            payload: checksum.to_be_bytes().to_vec(),
        }
    }

    pub fn rst(sequence_no: u32) -> Packet {
        Packet {
            kind: PacketKind::Rst,
            sequence_no,
            payload: Vec::new(),
        }
    }

    /// The payload interpreted as a single big-endian u32 - the form every
    /// control scalar (ISN echoes, CRC announcements) takes. `None` if the
    /// payload is not exactly four bytes.
    pub fn payload_scalar(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.payload.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// Serialize into a wire frame, appending the parity trailer last.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.payload.len() + MIN_FRAME_LEN);
        buf.put_u32(self.payload.len() as u32);
        buf.put_u8(self.kind as u8);
        buf.put_u32(self.sequence_no);
        buf.put_slice(&self.payload);
        let trailer = parity_marker(&buf);
        buf.put_u8(trailer);
        buf
    }

    /// Parse and validate a received frame.
    ///
    /// Validation order matters to the callers: size problems are malformed
    /// frames and dropped silently everywhere, a parity failure is NAK'd by
    /// the data-phase receiver, and an unknown kind is dropped even there.
    pub fn decode(frame: &[u8]) -> Result<Packet, DecodeError> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(DecodeError::TooShort { len: frame.len() });
        }

        let mut header = frame;
        let declared = header.get_u32();
        if declared as u64 + MIN_FRAME_LEN as u64 != frame.len() as u64 {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: frame.len(),
            });
        }
        let raw_kind = header.get_u8();
        let sequence_no = header.get_u32();

        let trailer = frame[frame.len() - 1];
        if trailer != parity_marker(&frame[..frame.len() - 1]) {
            return Err(DecodeError::Parity { trailer });
        }

        let kind =
            PacketKind::from_wire(raw_kind).ok_or(DecodeError::UnknownKind { raw: raw_kind })?;

        Ok(Packet {
            kind,
            sequence_no,
            payload: frame[PAYLOAD_OFFSET..frame.len() - 1].to_vec(),
        })
    }
}

/// The parity trailer implied by a frame body: [`PARITY_EVEN`] if the body's
/// total 1-bit count is even, [`PARITY_ODD`] otherwise.
pub fn parity_marker(body: &[u8]) -> u8 {
    let ones: u32 = body.iter().map(|b| b.count_ones()).sum();
    if ones % 2 == 0 {
        PARITY_EVEN
    } else {
        PARITY_ODD
    }
}

/// Why a received frame was rejected by the codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame of {len} bytes is shorter than the 10-byte minimum")]
    TooShort { len: usize },

    #[error("header declares {declared} payload bytes but the frame holds {actual} bytes total")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("parity trailer {trailer:#04x} does not match the frame body")]
    Parity { trailer: u8 },

    #[error("unknown packet type {raw:#04x}")]
    UnknownKind { raw: u8 },
}
