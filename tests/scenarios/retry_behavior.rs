use crate::helpers::*;
use microservice::backend::{ResourceSession, RetryPolicy, Retryable};
use microservice::ServiceError;
use std::time::Duration;
use tokio::time::Instant;

async fn open_and_commit(backend: &FlakyBackend) -> microservice::Result<u32> {
    backend
        .execute(move || async move {
            ResourceSession::new(backend)
                .commit(|_conn| Box::pin(async { Ok(7) }))
                .await
        })
        .await
}

/// k-1 transient failures are absorbed, waiting base * (1 + ... + k-1)
#[tokio::test(start_paused = true)]
async fn test_recovers_with_linear_backoff() {
    let backend = FlakyBackend::new(3, RetryPolicy::new(5, Duration::from_millis(100)));
    let started = Instant::now();

    let value = open_and_commit(&backend).await.unwrap();

    assert_eq!(value, 7);
    assert_eq!(started.elapsed(), Duration::from_millis(100 + 200 + 300));
    assert_eq!(backend.reconnects().get(), 3);
    let (connects, commits, rollbacks, closes) = backend.counts.snapshot();
    assert_eq!((connects, commits, rollbacks, closes), (4, 1, 0, 1));
}

/// Once the budget is spent the last transient error comes back unchanged
#[tokio::test(start_paused = true)]
async fn test_gives_up_after_budget() {
    let policy = RetryPolicy::new(3, Duration::from_millis(100));
    let backend = FlakyBackend::new(10, policy);
    let started = Instant::now();

    let err = open_and_commit(&backend).await.unwrap_err();

    assert!(matches!(err, ServiceError::TransientBackend { .. }));
    assert_eq!(started.elapsed(), policy.total_backoff());
    assert_eq!(backend.reconnects().get(), 3);
    assert_eq!(backend.counts.snapshot().0, 4);
}

#[tokio::test(start_paused = true)]
async fn test_no_retry_policy() {
    let backend = FlakyBackend::new(1, RetryPolicy::no_retry());
    let started = Instant::now();

    assert!(open_and_commit(&backend).await.is_err());

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(backend.reconnects().get(), 0);
    assert_eq!(backend.counts.snapshot().0, 1);
}
