//! Lock-free token buckets for per-user rate limiting.
//!
//! Each bucket packs `(last_refill_epoch_s, tokens)` into one `AtomicU64`
//! (stamp in the high word, tokens in the low word) and mutates it by
//! compare-and-swap, so heartbeat-frequency checks never contend on a
//! lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of a bucket take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeOutcome {
    /// A token was consumed.
    Granted,
    /// Bucket empty; retry after the given number of seconds.
    Denied {
        /// Seconds until at least one token refills.
        retry_after_s: u64,
    },
}

/// A linearly refilling token bucket.
///
/// Capacity `u32::MAX` means unlimited: every take is granted without
/// touching the atomic word.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    period_s: u64,
    state: AtomicU64,
}

#[inline]
fn pack(stamp_s: u32, tokens: u32) -> u64 {
    (u64::from(stamp_s) << 32) | u64::from(tokens)
}

#[inline]
#[allow(clippy::cast_possible_truncation)] // Intentional 32-bit split.
fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

impl TokenBucket {
    /// Create a full bucket that refills `capacity` tokens per `period_s`.
    #[must_use]
    pub fn new(capacity: u32, period_s: u64, now_s: u32) -> Self {
        Self {
            capacity,
            period_s,
            state: AtomicU64::new(pack(now_s, capacity)),
        }
    }

    /// Attempt to take one token at time `now_s` (unix seconds).
    pub fn take(&self, now_s: u32) -> TakeOutcome {
        if self.capacity == u32::MAX {
            return TakeOutcome::Granted;
        }

        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (stamp, tokens) = unpack(current);
            let elapsed = u64::from(now_s.saturating_sub(stamp));

            // Linear refill; the stamp advances only by the time the
            // refilled tokens account for, preserving fractional progress.
            let refilled =
                u32::try_from(elapsed * u64::from(self.capacity) / self.period_s.max(1))
                    .unwrap_or(u32::MAX);
            let (new_tokens, new_stamp) = if refilled > 0 {
                let credited = refilled.min(self.capacity.saturating_sub(tokens));
                let consumed_s = u64::from(credited) * self.period_s / u64::from(self.capacity);
                let stamp = if tokens.saturating_add(refilled) >= self.capacity {
                    now_s
                } else {
                    stamp.saturating_add(u32::try_from(consumed_s).unwrap_or(u32::MAX))
                };
                (tokens.saturating_add(credited), stamp)
            } else {
                (tokens, stamp)
            };

            if new_tokens == 0 {
                let per_token_s = (self.period_s / u64::from(self.capacity)).max(1);
                let since = u64::from(now_s.saturating_sub(new_stamp));
                return TakeOutcome::Denied {
                    retry_after_s: per_token_s.saturating_sub(since).max(1),
                };
            }

            let next = pack(new_stamp, new_tokens - 1);
            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return TakeOutcome::Granted,
                Err(observed) => current = observed,
            }
        }
    }

    /// Tokens currently available, after an implicit refill at `now_s`.
    #[must_use]
    pub fn available(&self, now_s: u32) -> u32 {
        if self.capacity == u32::MAX {
            return u32::MAX;
        }
        let (stamp, tokens) = unpack(self.state.load(Ordering::Acquire));
        let elapsed = u64::from(now_s.saturating_sub(stamp));
        let refilled = u32::try_from(elapsed * u64::from(self.capacity) / self.period_s.max(1))
            .unwrap_or(u32::MAX);
        tokens.saturating_add(refilled).min(self.capacity)
    }
}

/// The hourly/daily bucket pair guarding one `(user, activity)` key.
#[derive(Debug)]
pub struct BucketPair {
    hourly: TokenBucket,
    daily: TokenBucket,
}

impl BucketPair {
    /// Create a pair with the given capacities, both starting full.
    #[must_use]
    pub fn new(hourly_capacity: u32, daily_capacity: u32, now_s: u32) -> Self {
        Self {
            hourly: TokenBucket::new(hourly_capacity, 3600, now_s),
            daily: TokenBucket::new(daily_capacity, 86_400, now_s),
        }
    }

    /// Take from both buckets; a call is admitted only when both grant.
    ///
    /// The hourly bucket is checked first; a daily denial does not
    /// refund the hourly token — the call was still attempted.
    pub fn take(&self, now_s: u32) -> TakeOutcome {
        match self.hourly.take(now_s) {
            TakeOutcome::Granted => self.daily.take(now_s),
            denied @ TakeOutcome::Denied { .. } => denied,
        }
    }
}
