//! Integration tests for the idempotency key store and sweeper

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use catalog_intake::services::{BeginOutcome, ConflictReason, IdempotencyService, StoredResponse};
use catalog_intake::{CatalogDb, Config, IdempotencySweeper, Services};
use chrono::{TimeDelta, Utc};
use tempfile::TempDir;

fn file_services(temp_dir: &TempDir, ttl_secs: u64) -> Services {
    let mut config = Config::default();
    config.storage_dir = temp_dir.path().to_path_buf();
    config.idempotency_ttl_secs = ttl_secs;
    let db = Arc::new(CatalogDb::open(&config.database_path()).unwrap());
    Services::new(db, &config)
}

#[test]
fn test_concurrent_retries_single_owner() {
    let temp_dir = TempDir::new().unwrap();
    let services = file_services(&temp_dir, 3600);
    let idem: Arc<IdempotencyService> = services.idempotency.clone();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let idem = idem.clone();
            thread::spawn(move || idem.begin("order-42", b"{\"sku\":\"A\"}").unwrap())
        })
        .collect();
    let outcomes: Vec<BeginOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(outcomes.iter().filter(|o| **o == BeginOutcome::Proceed).count(), 1);
    assert!(outcomes
        .iter()
        .filter(|o| **o != BeginOutcome::Proceed)
        .all(|o| *o == BeginOutcome::Conflict(ConflictReason::InFlight)));

    idem.complete("order-42", 201, b"{\"id\":1}").unwrap();
    assert_eq!(
        idem.begin("order-42", b"{\"sku\":\"A\"}").unwrap(),
        BeginOutcome::Replay(StoredResponse { status: 201, body: b"{\"id\":1}".to_vec() })
    );
}

#[test]
fn test_entries_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let services = file_services(&temp_dir, 3600);
        services.idempotency.begin("k1", b"body").unwrap();
        services.idempotency.complete("k1", 201, b"stored").unwrap();
    }

    let services = file_services(&temp_dir, 3600);
    match services.idempotency.begin("k1", b"body").unwrap() {
        BeginOutcome::Replay(stored) => assert_eq!(stored.body, b"stored"),
        other => panic!("expected replay, got {:?}", other),
    }
}

#[test]
fn test_expiry_then_sweep() {
    let temp_dir = TempDir::new().unwrap();
    let services = file_services(&temp_dir, 60);
    let idem = services.idempotency.clone();
    let now = Utc::now();

    idem.begin_at("stale", b"a", now - TimeDelta::seconds(600)).unwrap();
    idem.complete("stale", 201, b"{}").unwrap();
    idem.begin_at("live", b"b", now).unwrap();

    let stats = idem.stats().unwrap();
    assert_eq!(stats.total_keys, 2);
    assert_eq!(stats.expired_keys, 1);
    assert!(stats.cleanup_needed);

    let sweeper = IdempotencySweeper::new(idem.clone(), services.events.clone(), Duration::from_secs(600));
    assert_eq!(sweeper.sweep_once().unwrap(), 1);

    let stats = idem.stats().unwrap();
    assert_eq!(stats.total_keys, 1);
    assert_eq!(stats.pending_keys, 1);
    assert!(!stats.cleanup_needed);
}
