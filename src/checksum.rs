use std::fmt::{Debug, Formatter};

/// Running CRC-32 over the session's payload bytes.
///
/// Both endpoints maintain one: the initiator over every chunk that was
/// acknowledged, the acceptor over every chunk it delivered. The two values
/// are compared when the stream is finished (the FIN payload), so they must
/// be folded from the same bytes in the same order.
///
/// The algorithm is the ubiquitous reflected CRC-32 (polynomial 0xEDB88320,
/// initial value 0xFFFFFFFF, final XOR 0xFFFFFFFF) as implemented by
/// `crc32fast`.
#[derive(Clone, Default)]
pub struct RunningCrc {
    hasher: crc32fast::Hasher,
}

impl Debug for RunningCrc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RunningCrc({:08x})", self.value())
    }
}

impl RunningCrc {
    pub fn new() -> RunningCrc {
        RunningCrc::default()
    }

    /// Fold more payload bytes into the checksum.
    pub fn fold(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// The checksum over everything folded so far. Does not consume the
    /// state; more bytes can be folded afterwards.
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Forget everything folded so far. Used when a session restarts after
    /// a reset.
    pub fn reset(&mut self) {
        self.hasher = crc32fast::Hasher::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty(b"".as_slice(), 0x0000_0000)]
    #[case::hi(b"HI".as_slice(), 0x7679_2EC6)]
    #[case::standard_check(b"123456789".as_slice(), 0xCBF4_3926)]
    fn test_known_vectors(#[case] bytes: &[u8], #[case] expected: u32) {
        let mut crc = RunningCrc::new();
        crc.fold(bytes);
        assert_eq!(crc.value(), expected);
    }

    #[test]
    fn incremental_folding_equals_one_shot() {
        let mut whole = RunningCrc::new();
        whole.fold(b"123456789");

        let mut parts = RunningCrc::new();
        parts.fold(b"123");
        parts.fold(b"45");
        parts.fold(b"6789");

        assert_eq!(parts.value(), whole.value());
    }

    #[test]
    fn value_does_not_consume_state() {
        let mut crc = RunningCrc::new();
        crc.fold(b"12345");
        let _ = crc.value();
        crc.fold(b"6789");

        let mut whole = RunningCrc::new();
        whole.fold(b"123456789");
        assert_eq!(crc.value(), whole.value());
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let mut crc = RunningCrc::new();
        crc.fold(b"stale bytes from before the restart");
        crc.reset();
        assert_eq!(crc.value(), RunningCrc::new().value());

        crc.fold(b"HI");
        assert_eq!(crc.value(), 0x7679_2EC6);
    }
}
