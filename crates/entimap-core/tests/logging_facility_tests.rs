#![allow(clippy::unwrap_used, clippy::expect_used)]

// Lifecycle macros observed through the in-memory capture. Every test uses
// its own op name because the capture is shared across the process.

use entimap_core::errors::{ExErrorKind, MapError};
use entimap_core::logging_facility::test_capture::init_test_capture;
use entimap_core::{log_op_end, log_op_error, log_op_start};
use entimap_core_types::Lifecycle;

#[test]
fn test_start_carries_component_and_fields() {
    let capture = init_test_capture();

    log_op_start!("lf_start_fields", entity_type = "product", entity_id = 9);

    let events = capture.events_for_op("lf_start_fields");
    assert_eq!(events.len(), 1);
    let start = &events[0];
    assert_eq!(start.lifecycle(), Some(Lifecycle::Start));
    assert_eq!(start.field("entity_type"), Some("product"));
    assert_eq!(start.field("entity_id"), Some("9"));
    assert!(start
        .component
        .as_deref()
        .is_some_and(|c| c.starts_with("logging_facility_tests")));
}

#[test]
fn test_end_records_duration() {
    let capture = init_test_capture();

    log_op_end!("lf_end_duration", duration_ms = 42, count = 3);

    let events = capture.events_for_op("lf_end_duration");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].lifecycle(), Some(Lifecycle::End));
    assert_eq!(events[0].field("duration_ms"), Some("42"));
    assert_eq!(events[0].field("count"), Some("3"));
}

#[test]
fn test_error_records_kind_and_code() {
    let capture = init_test_capture();
    let err = MapError::DuplicateValue {
        prop: "sku".to_string(),
        value: "RM-1".to_string(),
    };

    log_op_error!("lf_error_code", err, duration_ms = 10);

    capture.assert_event_exists("lf_error_code", "end_error");
    let failed = capture
        .events_for_op("lf_error_code")
        .into_iter()
        .find(|e| e.lifecycle() == Some(Lifecycle::EndError))
        .expect("error event");
    assert_eq!(failed.level, tracing::Level::ERROR);
    assert_eq!(failed.field("err.code"), Some("ERR_DUPLICATE_VALUE"));
    assert_eq!(
        failed.field("err.kind"),
        Some(format!("{:?}", ExErrorKind::DuplicateValue).as_str())
    );
}

#[test]
fn test_operation_that_fails_is_still_balanced() {
    let capture = init_test_capture();
    let op = "lf_balanced";

    log_op_start!(op, entity_type = "product");
    log_op_end!(op, duration_ms = 1);
    log_op_start!(op, entity_type = "product");
    log_op_error!(
        op,
        MapError::NotFound {
            entity_type: "product".to_string(),
            id: 5,
        },
        duration_ms = 2
    );

    capture.assert_balanced(op);
    assert_eq!(capture.count_phase(op, Lifecycle::Start), 2);
    assert_eq!(capture.count_phase(op, Lifecycle::EndError), 1);
}

#[test]
#[should_panic(expected = "was never started")]
fn test_balanced_requires_a_start() {
    let capture = init_test_capture();
    log_op_end!("lf_orphan_end", duration_ms = 0);

    capture.assert_balanced("lf_orphan_end");
}
