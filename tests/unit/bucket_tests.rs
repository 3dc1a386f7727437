//! Unit tests for the packed-atomic token buckets.

use relay_control::quota::bucket::{BucketPair, TakeOutcome, TokenBucket};

#[test]
fn full_bucket_grants_until_empty() {
    let bucket = TokenBucket::new(3, 3600, 1000);
    assert_eq!(bucket.take(1000), TakeOutcome::Granted);
    assert_eq!(bucket.take(1000), TakeOutcome::Granted);
    assert_eq!(bucket.take(1000), TakeOutcome::Granted);
    assert!(matches!(bucket.take(1000), TakeOutcome::Denied { .. }));
}

#[test]
fn denial_carries_a_positive_retry_hint() {
    let bucket = TokenBucket::new(60, 3600, 0);
    while bucket.take(0) == TakeOutcome::Granted {}
    let TakeOutcome::Denied { retry_after_s } = bucket.take(0) else {
        panic!("bucket should be empty");
    };
    assert!(retry_after_s >= 1);
    // One token refills every 60 seconds at 60-per-hour.
    assert!(retry_after_s <= 60);
}

#[test]
fn linear_refill_restores_tokens() {
    let bucket = TokenBucket::new(60, 3600, 0);
    while bucket.take(0) == TakeOutcome::Granted {}

    // 120 seconds refills two tokens at one per minute.
    assert_eq!(bucket.take(120), TakeOutcome::Granted);
    assert_eq!(bucket.take(120), TakeOutcome::Granted);
    assert!(matches!(bucket.take(120), TakeOutcome::Denied { .. }));
}

#[test]
fn refill_never_exceeds_capacity() {
    let bucket = TokenBucket::new(5, 3600, 0);
    assert_eq!(bucket.available(1_000_000), 5);
}

#[test]
fn unlimited_capacity_always_grants() {
    let bucket = TokenBucket::new(u32::MAX, 3600, 0);
    for _ in 0..10_000 {
        assert_eq!(bucket.take(0), TakeOutcome::Granted);
    }
}

#[test]
fn pair_requires_both_buckets() {
    // Hourly allows 10, daily allows only 2.
    let pair = BucketPair::new(10, 2, 0);
    assert_eq!(pair.take(0), TakeOutcome::Granted);
    assert_eq!(pair.take(0), TakeOutcome::Granted);
    assert!(matches!(pair.take(0), TakeOutcome::Denied { .. }));
}
