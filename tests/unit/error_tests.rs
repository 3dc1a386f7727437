//! Unit tests for the application error type.

use relay_control::AppError;

#[test]
fn display_carries_kind_prefix() {
    assert_eq!(
        AppError::NotFound("session x".into()).to_string(),
        "not found: session x"
    );
    assert_eq!(
        AppError::Conflict("dup".into()).to_string(),
        "conflict: dup"
    );
    assert_eq!(
        AppError::Throttled { retry_after_s: 12 }.to_string(),
        "throttled: retry after 12s"
    );
}

#[test]
fn quota_exceeded_carries_structured_fields() {
    let err = AppError::QuotaExceeded {
        resource: "session".into(),
        current: 1,
        max: 1,
    };
    assert_eq!(err.to_string(), "quota exceeded: session (1/1)");
}

#[test]
fn transient_classification() {
    assert!(AppError::PlatformTransient("x".into()).is_transient());
    assert!(AppError::StoreBusy("x".into()).is_transient());
    assert!(!AppError::PlatformPermanent("x".into()).is_transient());
    assert!(!AppError::NotFound("x".into()).is_transient());
}

#[tokio::test]
async fn busy_retry_retries_only_store_contention() {
    use std::sync::atomic::{AtomicU32, Ordering};

    use relay_control::persistence::retry::with_busy_retry;

    let attempts = AtomicU32::new(0);
    let result: relay_control::Result<u32> = with_busy_retry(5, || {
        let n = attempts.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(AppError::StoreBusy("locked".into()))
            } else {
                Ok(n)
            }
        }
    })
    .await;
    assert_eq!(result.unwrap(), 2);

    // Non-transient errors pass straight through.
    let calls = AtomicU32::new(0);
    let result: relay_control::Result<()> = with_busy_retry(5, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(AppError::NotFound("x".into())) }
    })
    .await;
    assert!(matches!(result.unwrap_err(), AppError::NotFound(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A spent budget escalates to an internal error.
    let result: relay_control::Result<()> = with_busy_retry(1, || async {
        Err(AppError::StoreBusy("still locked".into()))
    })
    .await;
    assert!(matches!(result.unwrap_err(), AppError::Internal(_)));
}

#[test]
fn toml_errors_become_config() {
    let err: AppError = toml::from_str::<relay_control::config::GlobalConfig>("not valid [ toml")
        .map(|_| ())
        .unwrap_err()
        .into();
    assert!(matches!(err, AppError::Config(_)));
}
