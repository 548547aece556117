use entimap_core::errors::{ExError, ExErrorKind, MapError};

#[test]
fn test_not_found_verifiable_by_kind() {
    let err = MapError::NotFound {
        entity_type: "product".to_string(),
        id: 12,
    };

    let ex_err: ExError = err.into();

    assert_eq!(ex_err.kind(), ExErrorKind::NotFound);
    assert_eq!(ex_err.code(), "ERR_NOT_FOUND");
    assert_eq!(ex_err.entity_type(), Some("product"));
    assert_eq!(ex_err.entity_id(), Some(12));
}

#[test]
fn test_duplicate_value_structured_fields() {
    let err = MapError::DuplicateValue {
        prop: "sku".to_string(),
        value: "AB-1".to_string(),
    };

    let ex_err: ExError = err.into();

    assert_eq!(ex_err.kind(), ExErrorKind::DuplicateValue);
    assert_eq!(ex_err.code(), "ERR_DUPLICATE_VALUE");
    assert_eq!(ex_err.prop(), Some("sku"));
    assert!(ex_err.message().contains("AB-1"));
}

#[test]
fn test_error_kind_code_mapping() {
    let kinds = vec![
        (ExErrorKind::SchemaInvalid, "ERR_SCHEMA_INVALID"),
        (ExErrorKind::NotFound, "ERR_NOT_FOUND"),
        (ExErrorKind::DuplicateValue, "ERR_DUPLICATE_VALUE"),
        (ExErrorKind::MissingRequired, "ERR_MISSING_REQUIRED"),
        (ExErrorKind::InvalidEnumValue, "ERR_INVALID_ENUM_VALUE"),
        (ExErrorKind::PersistFailed, "ERR_PERSIST_FAILED"),
        (ExErrorKind::InvalidInput, "ERR_INVALID_INPUT"),
        (ExErrorKind::Persistence, "ERR_PERSISTENCE"),
        (ExErrorKind::Serialization, "ERR_SERIALIZATION"),
        (ExErrorKind::Io, "ERR_IO"),
        (ExErrorKind::Internal, "ERR_INTERNAL"),
    ];

    for (kind, expected_code) in kinds {
        assert_eq!(kind.code(), expected_code);
    }
}

#[test]
fn test_schema_invalid_is_registration_error() {
    let err = MapError::SchemaInvalid {
        entity_type: "note".to_string(),
        reason: "meta properties declared without a meta table".to_string(),
    };

    let ex_err: ExError = err.into();

    assert_eq!(ex_err.kind(), ExErrorKind::SchemaInvalid);
    assert_eq!(ex_err.op(), Some("register_schema"));
    assert!(!ex_err.kind().is_validation());
}

#[test]
fn test_unknown_entity_type_maps_to_schema_invalid() {
    let ex_err: ExError = MapError::UnknownEntityType {
        entity_type: "ghost".to_string(),
    }
    .into();

    assert_eq!(ex_err.kind(), ExErrorKind::SchemaInvalid);
    assert_eq!(ex_err.entity_type(), Some("ghost"));
}

#[test]
fn test_persist_failed_keeps_source() {
    let cause = ExError::new(ExErrorKind::Persistence).with_message("database is locked");
    let ex_err: ExError = ExError::from(MapError::PersistFailed {
        entity_type: "product".to_string(),
        reason: "insert affected no rows".to_string(),
    })
    .with_source(cause);

    assert_eq!(ex_err.kind(), ExErrorKind::PersistFailed);
    assert_eq!(
        ex_err.source_error().map(ExError::kind),
        Some(ExErrorKind::Persistence)
    );
    assert!(ex_err.to_string().contains("database is locked"));
}

#[test]
fn test_invalid_value_maps_to_invalid_input() {
    let ex_err: ExError = MapError::InvalidValue {
        prop: "price".to_string(),
        reason: "must not be negative".to_string(),
    }
    .into();

    assert_eq!(ex_err.kind(), ExErrorKind::InvalidInput);
    assert_eq!(ex_err.code(), "ERR_INVALID_INPUT");
}
