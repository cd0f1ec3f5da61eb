use crate::helpers::*;
use microservice::backend::{ResourceSession, RetryPolicy, Retryable};
use microservice::ServiceError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Every retry gets a fresh session; failed attempts roll back and close
#[tokio::test(start_paused = true)]
async fn test_each_attempt_has_its_own_session() {
    let backend = FlakyBackend::new(0, RetryPolicy::new(5, Duration::from_millis(50)));
    let attempts = Arc::new(AtomicU32::new(0));
    let (shared, backend_ref) = (&attempts, &backend);

    let written = backend
        .execute(move || {
            let attempts = Arc::clone(shared);
            async move {
                ResourceSession::new(backend_ref)
                    .commit(move |_conn| {
                        Box::pin(async move {
                            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                                Err(transient("deadlock detected"))
                            } else {
                                Ok(12u64)
                            }
                        })
                    })
                    .await
            }
        })
        .await
        .unwrap();

    assert_eq!(written, 12);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let (connects, commits, rollbacks, closes) = backend.counts.snapshot();
    assert_eq!(connects, 3);
    assert_eq!(commits, 1);
    assert_eq!(rollbacks, 2);
    assert_eq!(closes, 3);
    assert_eq!(backend.reconnects().get(), 2);
}

/// Business errors are not retried and the transaction is rolled back once
#[tokio::test(start_paused = true)]
async fn test_business_error_not_retried() {
    let backend = FlakyBackend::new(0, RetryPolicy::new(5, Duration::from_millis(50)));
    let backend_ref = &backend;

    let err = backend
        .execute(move || async move {
            ResourceSession::new(backend_ref)
                .commit(|_conn| {
                    Box::pin(async { Err::<(), _>(ServiceError::business("unknown dataset")) })
                })
                .await
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::BusinessLogic(_)));
    assert_eq!(backend.counts.snapshot(), (1, 0, 1, 1));
    assert_eq!(backend.reconnects().get(), 0);
}

/// Read-only sessions always roll back, even when the work succeeds
#[tokio::test]
async fn test_rollback_session_never_commits() {
    let backend = FlakyBackend::new(0, RetryPolicy::no_retry());

    let rows = ResourceSession::new(&backend)
        .rollback(|_conn| Box::pin(async { Ok(vec![1, 2, 3]) }))
        .await
        .unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(backend.counts.snapshot(), (1, 0, 1, 1));
}

/// A failed connect never hands out a connection, so nothing is closed
#[tokio::test]
async fn test_connect_failure_opens_nothing() {
    let backend = FlakyBackend::new(1, RetryPolicy::no_retry());

    let err = ResourceSession::new(&backend)
        .commit(|_conn| Box::pin(async { Ok(()) }))
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(backend.counts.snapshot(), (1, 0, 0, 0));
}
