use crate::helpers::*;
use chrono::{NaiveDate, NaiveTime};
use microservice::core::ServiceError;
use microservice::persistence::{InMemoryPersistence, PersistenceBackend, RunStatus, RunTrigger};
use std::sync::Arc;
use std::time::Duration;

/// The scheduled loop keeps running until a unit of work fails, then stops
#[tokio::test]
async fn test_interval_stops_on_first_failure() {
    let journal = journal();
    let history = Arc::new(InMemoryPersistence::new());
    let clock = FakeClock::at(12, 0, 0);
    let service = engine(
        settings("name: scoring\ninterval: 60\nresolution: 5\n"),
        MockInput::new(&journal).script(vec![None, Some(transient("warehouse offline"))]),
        MockModel::new(&journal),
        MockOutput::new(&journal),
    )
    .with_history(history.clone());

    let err = service.run_service(clock.clone()).await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(count(&journal, "fetch"), 2);
    assert_eq!(count(&journal, "emit"), 1);
    assert_eq!(count(&journal, "reclaim"), 2);

    let runs = history.list_runs("scoring").await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.trigger == RunTrigger::Scheduled));
    let failed: Vec<_> = runs.iter().filter(|r| r.status == RunStatus::Failed).collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.as_deref().unwrap().contains("warehouse offline"));
}

/// A business-logic failure in a scheduled cycle ends the loop on that cycle
#[tokio::test]
async fn test_business_error_stops_schedule() {
    let journal = journal();
    let history = Arc::new(InMemoryPersistence::new());
    let clock = FakeClock::at(12, 0, 0);
    let service = engine(
        settings("name: scoring\ninterval: 60\nresolution: 5\n"),
        MockInput::new(&journal),
        MockModel::new(&journal).failing_predict(),
        MockOutput::new(&journal),
    )
    .with_history(history.clone());

    let err = service.run_service(clock.clone()).await.unwrap_err();

    assert!(matches!(err, ServiceError::BusinessLogic(_)));
    assert_eq!(count(&journal, "fetch"), 1);
    assert_eq!(count(&journal, "predict"), 1);
    assert_eq!(count(&journal, "emit"), 0);
    assert_eq!(count(&journal, "reclaim"), 1);

    let runs = history.list_runs("scoring").await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].trigger, RunTrigger::Scheduled);
}

/// Sleeps halve the remaining time but never drop below the resolution
#[tokio::test]
async fn test_interval_sleep_pattern() {
    let journal = journal();
    let clock = FakeClock::at(12, 0, 0);
    let service = engine(
        settings("name: scoring\ninterval: 60\nresolution: 5\n"),
        MockInput::new(&journal).script(vec![Some(transient("offline"))]),
        MockModel::new(&journal),
        MockOutput::new(&journal),
    );

    assert!(service.run_service(clock.clone()).await.is_err());

    assert_eq!(
        clock.sleeps(),
        vec![
            Duration::from_secs(30),
            Duration::from_secs(15),
            Duration::from_millis(7500),
            Duration::from_secs(5),
            Duration::from_secs(5),
        ]
    );
    let dispatched_at = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_time(NaiveTime::from_hms_milli_opt(12, 1, 2, 500).unwrap());
    assert_eq!(clock.current(), dispatched_at);
}

/// A daily run fires within one resolution of its wall-clock time
#[tokio::test]
async fn test_daily_dispatch_time() {
    let journal = journal();
    let clock = FakeClock::at(5, 59, 0);
    let service = engine(
        settings("name: scoring\nscheduled_time: \"06:00\"\nresolution: 5\n"),
        MockInput::new(&journal).script(vec![Some(transient("offline"))]),
        MockModel::new(&journal),
        MockOutput::new(&journal),
    );

    assert!(service.run_service(clock.clone()).await.is_err());

    let due = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(6, 0, 0)
        .unwrap();
    let now = clock.current();
    assert!(now >= due);
    assert!(now - due <= chrono::TimeDelta::seconds(5));
    assert_eq!(count(&journal, "fetch"), 1);
}

/// Starting after today's time waits for tomorrow instead of running at once
#[tokio::test]
async fn test_daily_time_already_passed() {
    let journal = journal();
    let clock = FakeClock::at(7, 0, 0);
    let service = engine(
        settings("name: scoring\nscheduled_time: \"06:00\"\n"),
        MockInput::new(&journal).script(vec![Some(transient("offline"))]),
        MockModel::new(&journal),
        MockOutput::new(&journal),
    );

    assert!(service.run_service(clock.clone()).await.is_err());

    let tomorrow = NaiveDate::from_ymd_opt(2024, 3, 2)
        .unwrap()
        .and_hms_opt(6, 0, 0)
        .unwrap();
    assert!(clock.current() >= tomorrow);
    assert_eq!(count(&journal, "fetch"), 1);
}

#[tokio::test]
async fn test_invalid_schedule_rejected_before_ping() {
    let journal = journal();
    let service = engine(
        settings("name: scoring\nscheduled_time: \"quarter past six\"\n"),
        MockInput::new(&journal),
        MockModel::new(&journal),
        MockOutput::new(&journal),
    );

    let err = service.run_service(FakeClock::at(7, 0, 0)).await.unwrap_err();

    assert!(err.is_configuration());
    assert!(entries(&journal).is_empty());
}
