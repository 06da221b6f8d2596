//! Transaction ids are minted from a nanosecond clock, matching
//! gostore's `getNextTransactionId`. Pulled behind a trait so tests can
//! supply a deterministic source.

/// A monotonic-enough source of transaction ids. Implementations don't
/// need to guarantee strict monotonicity across threads; collisions are
/// tolerated the same way the original source tolerated them (ids are
/// scoped by origin/token, not globally unique).
pub trait Clock: Send + Sync {
    fn now_nanos(&self) -> u64;
}

/// Wall-clock time since `UNIX_EPOCH`, in nanoseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos() as u64
    }
}

#[cfg(test)]
pub struct FixedClock(pub std::sync::atomic::AtomicU64);

#[cfg(test)]
impl Clock for FixedClock {
    fn now_nanos(&self) -> u64 {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}
