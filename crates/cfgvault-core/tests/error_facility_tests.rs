use cfgvault_core::errors::{CvError, CvErrorKind, VaultError};

#[test]
fn test_already_running_verifiable_by_kind() {
    let err = VaultError::AlreadyRunning {
        device_id: "OLT-CORE-01".to_string(),
    };

    let cv_err: CvError = err.into();

    assert_eq!(cv_err.kind(), CvErrorKind::AlreadyRunning);
    assert_eq!(cv_err.code(), "ERR_ALREADY_RUNNING");
    assert_eq!(cv_err.device_id(), Some("OLT-CORE-01"));
}

#[test]
fn test_checksum_mismatch_is_integrity() {
    let err = VaultError::ChecksumMismatch {
        snapshot_id: "snap-1".to_string(),
        expected: "aa".to_string(),
        actual: "bb".to_string(),
    };

    let cv_err: CvError = err.into();

    assert_eq!(cv_err.kind(), CvErrorKind::Integrity);
    assert_eq!(cv_err.entity_id(), Some("snap-1"));
    assert!(cv_err.message().contains("expected aa"));
}

#[test]
fn test_missing_object_is_integrity_not_not_found() {
    let cv_err: CvError = VaultError::ObjectMissing {
        snapshot_id: "snap-2".to_string(),
    }
    .into();

    assert_eq!(cv_err.kind(), CvErrorKind::Integrity);
    assert_ne!(cv_err.kind(), CvErrorKind::NotFound);
}

#[test]
fn test_collection_errors_split_connect_and_collect() {
    let connect: CvError = VaultError::AuthenticationFailed {
        device_id: "sw-1".to_string(),
    }
    .into();
    let collect: CvError = VaultError::UnexpectedOutput {
        device_id: "sw-1".to_string(),
        reason: "empty output".to_string(),
    }
    .into();
    let timeout: CvError = VaultError::CollectTimeout {
        device_id: "sw-1".to_string(),
        elapsed_ms: 30_000,
    }
    .into();

    assert_eq!(connect.kind(), CvErrorKind::Connect);
    assert_eq!(collect.kind(), CvErrorKind::Collect);
    assert_eq!(timeout.kind(), CvErrorKind::Timeout);
}

#[test]
fn test_display_format() {
    let err = CvError::new(CvErrorKind::Persistence)
        .with_op("commit")
        .with_device_id("rtr-9")
        .with_message("index busy");

    assert_eq!(
        err.to_string(),
        "[ERR_PERSISTENCE] in operation 'commit': index busy (device_id: rtr-9)"
    );
}

#[test]
fn test_upload_validation_errors_are_validation() {
    let err: CvError = VaultError::UnexpectedFileName {
        file_name: "running.cfg".to_string(),
        expected: "startrun.dat".to_string(),
    }
    .into();
    assert_eq!(err.kind(), CvErrorKind::Validation);
    assert_eq!(err.code(), "ERR_VALIDATION");
}
