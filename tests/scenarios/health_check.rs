use crate::helpers::*;
use microservice::ServiceError;

const SETTINGS: &str = "name: scoring\n";

/// An unreachable output stops the health check before anything else is touched
#[tokio::test]
async fn test_output_checked_first() {
    let journal = journal();
    let service = engine(
        settings(SETTINGS),
        MockInput::new(&journal),
        MockModel::new(&journal),
        MockOutput::new(&journal).failing_ping(),
    );

    let err = service.run_once_now().await.unwrap_err();

    match err {
        ServiceError::HealthCheckFailed { component, .. } => assert_eq!(component, "output"),
        other => panic!("expected a health check failure, got {other}"),
    }
    assert_eq!(entries(&journal), vec!["ping:output"]);
}

#[tokio::test]
async fn test_input_failure_names_input() {
    let journal = journal();
    let service = engine(
        settings(SETTINGS),
        MockInput::new(&journal).failing_ping(),
        MockModel::new(&journal),
        MockOutput::new(&journal),
    );

    let err = service.run_ping_now().await.unwrap_err();

    assert!(matches!(
        err,
        ServiceError::HealthCheckFailed { component: "input", .. }
    ));
    assert_eq!(entries(&journal), vec!["ping:output", "ping:input"]);
}

/// A failed health check means no unit of work runs at all
#[tokio::test]
async fn test_no_work_after_failed_check() {
    let journal = journal();
    let service = engine(
        settings("name: scoring\ninterval: 60\n"),
        MockInput::new(&journal).failing_ping(),
        MockModel::new(&journal),
        MockOutput::new(&journal),
    );

    let result = service.run_service(FakeClock::at(12, 0, 0)).await;

    assert!(result.is_err());
    assert_eq!(count(&journal, "fetch"), 0);
    assert_eq!(count(&journal, "reclaim"), 0);
}

#[tokio::test]
async fn test_ping_order() {
    let journal = journal();
    let service = engine(
        settings(SETTINGS),
        MockInput::new(&journal),
        MockModel::new(&journal),
        MockOutput::new(&journal),
    );

    service.run_ping_now().await.unwrap();

    assert_eq!(
        entries(&journal),
        vec!["ping:output", "ping:input", "ping:model"]
    );
}
