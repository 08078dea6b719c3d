//! Token-bucket admission control.
//!
//! A [`TokenBucket`] holds up to `capacity` tokens and gains `refill_rate`
//! tokens per second. Each admitted request spends one token; a request that
//! finds the bucket empty is denied without consuming anything.
//!
//! # Refill approximation
//!
//! Refill is computed lazily on every [`TokenBucket::allow`] call as
//! `floor(elapsed_seconds * refill_rate)`. `last_refill` only advances when at
//! least one whole token was added, and then jumps to "now": the fractional
//! remainder of the elapsed interval is discarded rather than carried forward.
//! Under a steady trickle of calls the effective rate can therefore be
//! slightly below `refill_rate`, never above it.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::clock::{Clock, MonotonicClock};

/// Errors from constructing a limiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimiterError {
    #[error("token bucket capacity must be greater than zero")]
    ZeroCapacity,
}

/// Mutable bucket state, only ever touched under the bucket's lock.
#[derive(Debug)]
struct BucketState {
    available: u64,
    last_refill: Instant,
}

/// Process-wide token bucket shared by every request-handling task.
///
/// The read-refill-decide-decrement sequence in [`allow`](Self::allow) runs
/// inside a single critical section, so concurrent callers can neither
/// observe a stale token count nor spend the same token twice.
pub struct TokenBucket {
    capacity: u64,
    refill_rate: u64,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Creates a full bucket backed by the real monotonic clock.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::ZeroCapacity`] if `capacity` is zero.
    pub fn new(capacity: u32, refill_rate: u32) -> Result<Self, LimiterError> {
        Self::with_clock(capacity, refill_rate, Arc::new(MonotonicClock))
    }

    /// Creates a bucket admitting `requests_per_second` requests per second,
    /// with a burst of the same size.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::ZeroCapacity`] if `requests_per_second` is zero.
    pub fn per_second(requests_per_second: u32) -> Result<Self, LimiterError> {
        Self::new(requests_per_second, requests_per_second)
    }

    /// Creates a full bucket that reads time from the given clock.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::ZeroCapacity`] if `capacity` is zero.
    pub fn with_clock(
        capacity: u32,
        refill_rate: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LimiterError> {
        if capacity == 0 {
            return Err(LimiterError::ZeroCapacity);
        }
        let now = clock.now();
        Ok(Self {
            capacity: u64::from(capacity),
            refill_rate: u64::from(refill_rate),
            state: Mutex::new(BucketState {
                available: u64::from(capacity),
                last_refill: now,
            }),
            clock,
        })
    }

    /// Maximum number of tokens the bucket can hold.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Tokens added per second of elapsed time.
    #[must_use]
    pub fn refill_rate(&self) -> u64 {
        self.refill_rate
    }

    /// Refills the bucket for elapsed time, then spends one token if any is
    /// available. Returns `true` when the caller is admitted.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();

        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let to_add = (elapsed.as_secs_f64() * self.refill_rate as f64) as u64;

        if to_add > 0 {
            state.available = self.capacity.min(state.available.saturating_add(to_add));
            state.last_refill = now;
        }

        if state.available > 0 {
            state.available -= 1;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    /// Clock that only moves when told to.
    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now()),
            })
        }

        fn advance(&self, by: Duration) {
            *self.now.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock()
        }
    }

    fn manual_bucket(capacity: u32, refill_rate: u32) -> (TokenBucket, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let bucket = TokenBucket::with_clock(capacity, refill_rate, clock.clone()).unwrap();
        (bucket, clock)
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(TokenBucket::new(0, 10).unwrap_err(), LimiterError::ZeroCapacity);
        assert_eq!(TokenBucket::per_second(0).unwrap_err(), LimiterError::ZeroCapacity);
    }

    #[test]
    fn per_second_sets_capacity_and_rate() {
        let bucket = TokenBucket::per_second(7).unwrap();
        assert_eq!(bucket.capacity(), 7);
        assert_eq!(bucket.refill_rate(), 7);
    }

    #[test]
    fn full_bucket_admits_exactly_capacity_then_denies() {
        let (bucket, _clock) = manual_bucket(5, 5);
        for i in 0..5 {
            assert!(bucket.allow(), "call {} should be admitted", i + 1);
        }
        assert!(!bucket.allow(), "6th call should be denied");
        assert!(!bucket.allow(), "denial must not change state");
    }

    #[test]
    fn refills_after_one_second() {
        let (bucket, clock) = manual_bucket(5, 5);
        for _ in 0..5 {
            assert!(bucket.allow());
        }
        assert!(!bucket.allow());

        clock.advance(Duration::from_millis(1100));
        for _ in 0..5 {
            assert!(bucket.allow());
        }
        assert!(!bucket.allow(), "refill is clamped to capacity");
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let (bucket, clock) = manual_bucket(3, 100);
        clock.advance(Duration::from_secs(60));
        for _ in 0..3 {
            assert!(bucket.allow());
        }
        assert!(!bucket.allow());
    }

    #[test]
    fn fractional_elapsed_time_is_discarded() {
        // 1 token/s: 1.5s adds one token and moves last_refill to "now",
        // throwing away the extra half second.
        let (bucket, clock) = manual_bucket(1, 1);
        assert!(bucket.allow());

        clock.advance(Duration::from_millis(1500));
        assert!(bucket.allow());

        // Only 0.6s since the last refill, although 2.1s since the start.
        clock.advance(Duration::from_millis(600));
        assert!(!bucket.allow());

        clock.advance(Duration::from_millis(400));
        assert!(bucket.allow());
    }

    #[test]
    fn sub_token_elapsed_time_accumulates_until_a_token_is_earned() {
        // No token was added at 0.4s, so last_refill stays put and the
        // elapsed time keeps growing.
        let (bucket, clock) = manual_bucket(1, 1);
        assert!(bucket.allow());
        clock.advance(Duration::from_millis(400));
        assert!(!bucket.allow());
        clock.advance(Duration::from_millis(400));
        assert!(!bucket.allow());
        clock.advance(Duration::from_millis(300));
        assert!(bucket.allow());
    }

    #[test]
    fn zero_refill_rate_never_refills() {
        let (bucket, clock) = manual_bucket(2, 0);
        assert!(bucket.allow());
        assert!(bucket.allow());
        clock.advance(Duration::from_secs(3600));
        assert!(!bucket.allow());
    }

    #[test]
    fn real_clock_refills_after_waiting() {
        let bucket = TokenBucket::per_second(5).unwrap();
        for _ in 0..5 {
            assert!(bucket.allow());
        }
        assert!(!bucket.allow());

        thread::sleep(Duration::from_millis(1100));
        assert!(bucket.allow());
    }

    #[test]
    fn concurrent_callers_never_overspend() {
        let (bucket, _clock) = manual_bucket(100, 0);
        let bucket = Arc::new(bucket);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                thread::spawn(move || (0..20).filter(|_| bucket.allow()).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }

    proptest! {
        #[test]
        fn admissions_bounded_by_capacity_plus_refill(
            capacity in 1u32..20,
            refill_rate in 0u32..20,
            steps in proptest::collection::vec(0u64..1500, 1..60),
        ) {
            let (bucket, clock) = manual_bucket(capacity, refill_rate);
            let mut admitted = 0u64;
            let mut elapsed_ms = 0u64;

            for step in steps {
                clock.advance(Duration::from_millis(step));
                elapsed_ms += step;
                if bucket.allow() {
                    admitted += 1;
                }
            }

            let ceiling = u64::from(capacity) + elapsed_ms * u64::from(refill_rate) / 1000;
            prop_assert!(admitted <= ceiling);
        }
    }
}
