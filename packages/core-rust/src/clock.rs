//! Monotonic time source used by the token bucket.
//!
//! The limiter never reads the clock directly; it asks a [`Clock`], so tests
//! can step time forward deterministically instead of sleeping.

use std::time::Instant;

/// Abstraction over a monotonic clock for dependency injection.
///
/// The default implementation ([`MonotonicClock`]) delegates to
/// `std::time::Instant`.
pub trait Clock: Send + Sync {
    /// Returns the current monotonic instant.
    fn now(&self) -> Instant;
}

/// Default clock source that reads the real monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
