use rand::RngCore;

/// Source of initial sequence numbers.
///
/// Injectable so tests can pin the ISNs a handshake will pick; production
/// code uses [`ThreadRngIsn`].
pub trait IsnSource: Send + Sync + 'static {
    fn next_isn(&self) -> u32;
}

/// ISNs from the thread-local RNG (ChaCha-based, CSPRNG-seeded).
pub struct ThreadRngIsn;

impl IsnSource for ThreadRngIsn {
    fn next_isn(&self) -> u32 {
        rand::thread_rng().next_u32()
    }
}

/// Hands out a fixed sequence of ISNs, then wraps around. Test helper.
pub struct FixedIsns {
    isns: Vec<u32>,
    next: std::sync::atomic::AtomicUsize,
}

impl FixedIsns {
    pub fn new(isns: Vec<u32>) -> FixedIsns {
        assert!(!isns.is_empty());
        FixedIsns {
            isns,
            next: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl IsnSource for FixedIsns {
    fn next_isn(&self) -> u32 {
        let i = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.isns[i % self.isns.len()]
    }
}
