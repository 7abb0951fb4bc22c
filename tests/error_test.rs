//! Tests for error types

use livetune::pipeline::PipelineId;
use livetune::Error;

#[test]
fn test_temporary_failure_error() {
    let error = Error::temporary("census source unavailable");
    let error_str = format!("{error}");
    assert!(error_str.contains("Temporary failure"));
    assert!(error_str.contains("retried on the next scheduling tick"));
    assert!(error.is_retryable());
}

#[test]
fn test_permanent_failure_error() {
    let error = Error::permanent("no population named frontend");
    let error_str = format!("{error}");
    assert!(error_str.contains("Permanent failure"));
    assert!(error_str.contains("frontend"));
    assert!(!error.is_retryable());
}

#[test]
fn test_deadline_exceeded_error() {
    let error = Error::DeadlineExceeded {
        operation: "population census of xx/frontend".to_string(),
        deadline_ms: 60_000,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("population census of xx/frontend"));
    assert!(error_str.contains("60000 ms"));
    assert!(error.is_retryable());
}

#[test]
fn test_pipeline_conflict_error() {
    let error = Error::PipelineConflict(PipelineId::new("gc-tuning"));
    let error_str = format!("{error}");
    assert!(error_str.contains("gc-tuning"));
    assert!(error_str.contains("already exists"));
    assert!(!error.is_retryable());
}

#[test]
fn test_invalid_transition_error() {
    let error = Error::InvalidTransition {
        from: "FINALIZED".to_string(),
        to: "HYPOTHESIZE".to_string(),
    };
    assert_eq!(
        format!("{error}"),
        "Invalid pipeline stage transition: FINALIZED -> HYPOTHESIZE"
    );
}

#[test]
fn test_cancelled_is_not_retryable() {
    assert!(!Error::Cancelled.is_retryable());
    assert!(format!("{}", Error::Cancelled).contains("shutdown"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "settings.toml");
    let error: Error = io_error.into();
    assert!(matches!(error, Error::Io(_)));
    assert!(format!("{error}").contains("IO error"));
}

#[test]
fn test_serialization_error_conversion() {
    let json_error = serde_json::from_str::<u64>("not json").unwrap_err();
    let error: Error = json_error.into();
    assert!(matches!(error, Error::Serialization(_)));
}

#[test]
fn test_error_debug() {
    let error = Error::InvalidConfig("max_iterations must be at least 1".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("InvalidConfig"));
}
