// Lifecycle logging of public repository and query operations.
// Kept in its own test binary so no other test shares the capture.

mod common;

use common::{create_product, setup};
use entimap_core::logging_facility::init_test_capture;
use entimap_core::{ExErrorKind, Value};
use entimap_core_types::Lifecycle;
use entimap_store::QueryVars;

#[test]
fn test_public_operations_log_balanced_lifecycles() {
    let capture = init_test_capture();
    let fixture = setup();

    // create, update, read, query, failed read, delete
    let mut product = create_product(&fixture, &[("name", Value::from("Mug"))]);
    product.set("color", Value::from("red")).unwrap();
    product.save().unwrap();
    let repo = fixture.registry.get("product").unwrap();
    repo.read(product.id()).unwrap();
    fixture.registry.query("product", &QueryVars::new()).unwrap();
    assert_eq!(repo.read(404).unwrap_err().kind(), ExErrorKind::NotFound);
    repo.delete(&mut product, true).unwrap();

    for op in [
        "repository_create",
        "repository_update",
        "repository_read",
        "repository_delete",
        "query_execute",
    ] {
        capture.assert_balanced(op);
    }

    let failed = capture
        .events_for_op("repository_read")
        .into_iter()
        .find(|e| e.lifecycle() == Some(Lifecycle::EndError))
        .expect("failed read is logged");
    assert_eq!(failed.field("err.code"), Some("ERR_NOT_FOUND"));

    let query_end = capture
        .events_for_op("query_execute")
        .into_iter()
        .find(|e| e.lifecycle() == Some(Lifecycle::End))
        .expect("query end is logged");
    assert_eq!(query_end.field("count"), Some("1"));

    // lower layers stay at debug
    assert_eq!(
        capture.count_events(|e| e.op.is_none() && e.level < tracing::Level::DEBUG),
        0
    );
}
