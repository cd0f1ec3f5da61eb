use crate::helpers::*;
use microservice::persistence::{InMemoryPersistence, PersistenceBackend, RunStatus, RunTrigger};
use microservice::{ServiceError, ServiceEvent};
use std::sync::{Arc, Mutex};

/// One run walks fetch, transform, predict, emit and then reclaims the model
#[tokio::test]
async fn test_stage_order() {
    let journal = journal();
    let output = MockOutput::new(&journal);
    let emitted = output.emitted();
    let service = engine(
        settings("name: scoring\n"),
        MockInput::new(&journal),
        MockModel::new(&journal),
        output,
    );

    service.run_once_now().await.unwrap();

    assert_eq!(
        entries(&journal),
        vec![
            "ping:output",
            "ping:input",
            "ping:model",
            "fetch",
            "transform",
            "predict",
            "emit",
            "reclaim",
        ]
    );
    let emitted = emitted.lock().unwrap();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].get("predictions").unwrap().len(), 3);
}

#[tokio::test]
async fn test_model_failure_skips_emit_but_reclaims() {
    let journal = journal();
    let service = engine(
        settings("name: scoring\n"),
        MockInput::new(&journal),
        MockModel::new(&journal).failing_predict(),
        MockOutput::new(&journal),
    );

    let err = service.run_once_now().await.unwrap_err();

    assert!(matches!(err, ServiceError::BusinessLogic(_)));
    assert_eq!(count(&journal, "emit"), 0);
    assert_eq!(count(&journal, "reclaim"), 1);
}

/// A failed fetch never reaches the model, yet the model is still reclaimed
#[tokio::test]
async fn test_fetch_failure() {
    let journal = journal();
    let service = engine(
        settings("name: scoring\n"),
        MockInput::new(&journal).script(vec![Some(transient("warehouse offline"))]),
        MockModel::new(&journal),
        MockOutput::new(&journal),
    );

    let err = service.runner().run().await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(count(&journal, "transform"), 0);
    assert_eq!(count(&journal, "reclaim"), 1);
}

/// Without a schedule, `run_service` performs a single run and returns
#[tokio::test]
async fn test_unscheduled_service_runs_once() {
    let journal = journal();
    let history = Arc::new(InMemoryPersistence::new());
    let service = engine(
        settings("name: scoring\n"),
        MockInput::new(&journal),
        MockModel::new(&journal),
        MockOutput::new(&journal),
    )
    .with_history(history.clone());

    service.run_service(FakeClock::at(8, 0, 0)).await.unwrap();

    assert_eq!(count(&journal, "fetch"), 1);
    let runs = history.list_runs("scoring").await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Succeeded);
    assert_eq!(runs[0].trigger, RunTrigger::Once);
    assert!(runs[0].error.is_none());
}

#[tokio::test]
async fn test_events_for_failed_run() {
    let journal = journal();
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut service = engine(
        settings("name: scoring\n"),
        MockInput::new(&journal),
        MockModel::new(&journal).failing_predict(),
        MockOutput::new(&journal),
    );
    let sink = events.clone();
    service.add_event_handler(move |event| sink.lock().unwrap().push(event.clone()));

    assert!(service.run_once_now().await.is_err());

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], ServiceEvent::HealthCheckPassed { .. }));
    assert!(matches!(events[1], ServiceEvent::RunStarted { .. }));
    match &events[2] {
        ServiceEvent::RunFailed { error, .. } => assert!(error.contains("model diverged")),
        other => panic!("expected RunFailed, got {other:?}"),
    }
}
