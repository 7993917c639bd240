//! Integration tests for bulk ingestion

use std::sync::Arc;

use catalog_intake::services::bulk_service::BulkItemStatus;
use catalog_intake::{CatalogDb, Config, ErrorCode, IntakeError, Services};
use serde_json::{json, Value};

fn services() -> Services {
    let db = Arc::new(CatalogDb::open_in_memory().unwrap());
    Services::new(db, &Config::default())
}

fn records(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({"sku": format!("SKU-{:05}", i), "title": format!("Item {}", i)}))
        .collect()
}

fn payload(items: Vec<Value>) -> Vec<u8> {
    serde_json::to_vec(&json!({ "items": items })).unwrap()
}

#[test]
fn test_one_duplicate_in_batch() {
    let svc = services();
    svc.items
        .create(&serde_json::from_value(json!({"sku": "SKU-00003", "title": "Existing"})).unwrap())
        .unwrap();

    let resp = svc.bulk.bulk_create(&payload(records(8))).unwrap();

    assert_eq!(resp.total, 8);
    assert_eq!(resp.successful, 7);
    assert_eq!(resp.failed, 1);
    assert_eq!(resp.status_code(), 207);

    for (i, result) in resp.results.iter().enumerate() {
        assert_eq!(result.index, i);
        if i == 3 {
            assert_eq!(result.status, BulkItemStatus::Error);
            assert_eq!(result.status_code, 409);
            assert_eq!(result.error_code, Some(ErrorCode::DuplicateSku));
            assert!(result.data.is_none());
        } else {
            assert_eq!(result.status, BulkItemStatus::Success);
            let data = result.data.as_ref().unwrap();
            assert_eq!(data.sku, format!("SKU-{:05}", i));
        }
    }

    assert_eq!(svc.items.count().unwrap(), 8);
}

#[test]
fn test_lower_index_wins_within_batch() {
    let svc = services();
    let items = vec![
        json!({"sku": "SAME", "title": "first"}),
        json!({"sku": "SAME", "title": "second"}),
    ];

    let resp = svc.bulk.bulk_create(&payload(items)).unwrap();
    assert_eq!(resp.results[0].data.as_ref().unwrap().title, "first");
    assert_eq!(resp.results[1].error_code, Some(ErrorCode::DuplicateSku));
}

#[test]
fn test_over_limit_creates_nothing() {
    let svc = services();
    let err = svc.bulk.bulk_create(&payload(records(1001))).unwrap_err();

    assert!(matches!(err, IntakeError::TooManyItems { count: 1001, max: 1000 }));
    assert_eq!(err.code(), ErrorCode::TooManyItems);
    assert_eq!(svc.items.count().unwrap(), 0);
}

#[test]
fn test_exactly_at_limit_succeeds() {
    let svc = services();
    let resp = svc.bulk.bulk_create(&payload(records(1000))).unwrap();
    assert_eq!(resp.successful, 1000);
    assert_eq!(resp.status_code(), 200);
    assert_eq!(svc.items.count().unwrap(), 1000);
}

#[test]
fn test_empty_batch() {
    let svc = services();
    let err = svc.bulk.bulk_create(&payload(vec![])).unwrap_err();
    assert_eq!(err.code(), ErrorCode::EmptyBatch);
}
