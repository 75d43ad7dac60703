#![allow(clippy::unwrap_used, clippy::expect_used)]

use cfgvault_core::errors::VaultError;
use cfgvault_core::logging_facility::test_capture::init_test_capture;
use cfgvault_core::{log_op_end, log_op_error, log_op_start};
use cfgvault_core_types::schema::{EVENT_END, EVENT_END_ERROR, EVENT_START};

#[test]
fn test_log_op_start_macro() {
    let capture = init_test_capture();
    let op_name = "test_log_op_start_unique_1";

    log_op_start!(op_name, device_id = "rtr-01");

    let events = capture.events();
    let start = events
        .iter()
        .find(|e| e.op.as_deref() == Some(op_name) && e.event.as_deref() == Some(EVENT_START))
        .expect("start event captured");
    assert_eq!(start.device_id.as_deref(), Some("rtr-01"));
}

#[test]
fn test_log_op_end_macro() {
    let capture = init_test_capture();
    let op_name = "test_log_op_end_unique_2";

    log_op_end!(op_name, duration_ms = 42u64);

    let end_events: Vec<_> = capture
        .events()
        .into_iter()
        .filter(|e| e.op.as_deref() == Some(op_name) && e.event.as_deref() == Some(EVENT_END))
        .collect();

    assert_eq!(end_events.len(), 1);
    assert_eq!(end_events[0].field("duration_ms"), Some("42"));
}

#[test]
fn test_log_op_error_includes_code() {
    let capture = init_test_capture();
    let op_name = "test_log_op_error_unique_3";

    let err = VaultError::CollectTimeout {
        device_id: "sw-3".to_string(),
        elapsed_ms: 100,
    };
    log_op_error!(op_name, err, duration_ms = 100u64);

    let error_events: Vec<_> = capture
        .events()
        .into_iter()
        .filter(|e| {
            e.op.as_deref() == Some(op_name) && e.event.as_deref() == Some(EVENT_END_ERROR)
        })
        .collect();

    assert_eq!(error_events.len(), 1);
    assert_eq!(error_events[0].field("err_code"), Some("ERR_TIMEOUT"));
}

#[test]
fn test_single_start_and_end_per_operation() {
    let capture = init_test_capture();
    let op_name = "test_boundary_unique_4";

    log_op_start!(op_name, device_id = "olt-4");
    log_op_end!(op_name, duration_ms = 7u64, device_id = "olt-4");

    let starts = capture.count_events(|e| {
        e.op.as_deref() == Some(op_name) && e.event.as_deref() == Some(EVENT_START)
    });
    let ends = capture.count_events(|e| {
        e.op.as_deref() == Some(op_name) && e.event.as_deref() == Some(EVENT_END)
    });
    assert_eq!(starts, 1);
    assert_eq!(ends, 1);
}

#[test]
fn test_device_id_is_lifted_from_fields() {
    let capture = init_test_capture();
    tracing::info!(op = "lift_fields", device_id = "sw-09", ok = true);

    let events = capture.events_for_device("sw-09");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].op.as_deref(), Some("lift_fields"));
    assert_eq!(events[0].field("ok"), Some("true"));
}
