//! Integration tests for keyset pagination over a concurrently growing table

use std::collections::HashSet;
use std::sync::Arc;

use catalog_intake::cursor::Cursor;
use catalog_intake::db::{ItemStatus, NewItem};
use catalog_intake::services::{EventBus, ItemService, ListQuery};
use catalog_intake::{CatalogDb, PageLimits};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn service() -> ItemService {
    let db = Arc::new(CatalogDb::open_in_memory().unwrap());
    ItemService::new(db, Arc::new(EventBus::new()), PageLimits::default())
}

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds)
}

fn item(sku: &str) -> NewItem {
    NewItem {
        sku: sku.to_string(),
        title: format!("Title {}", sku),
        status: ItemStatus::Active,
        brand: None,
        category: None,
    }
}

fn page(svc: &ItemService, limit: u32, cursor: Option<String>) -> (Vec<i64>, Option<String>, bool) {
    let page = svc
        .list(&ListQuery {
            limit: Some(limit.to_string()),
            cursor,
            ..Default::default()
        })
        .unwrap();
    let ids = page.items.iter().map(|i| i.id).collect();
    (ids, page.next_cursor, page.has_more)
}

/// limit=2 over t1<t2<t3 yields [3,2] then [1]
#[test]
fn test_three_record_walk() {
    let svc = service();
    svc.insert_at(&item("A"), at(1)).unwrap();
    svc.insert_at(&item("B"), at(2)).unwrap();
    svc.insert_at(&item("C"), at(3)).unwrap();

    let (ids, cursor, has_more) = page(&svc, 2, None);
    assert_eq!(ids, vec![3, 2]);
    assert!(has_more);
    let decoded = Cursor::decode(cursor.as_deref().unwrap()).unwrap();
    assert_eq!(decoded, Cursor::new(at(2), 2));

    let (ids, cursor, has_more) = page(&svc, 2, cursor);
    assert_eq!(ids, vec![1]);
    assert!(!has_more);
    assert!(cursor.is_none());
}

/// Walking every page visits each row exactly once, in order
#[test]
fn test_walk_is_complete_and_ordered() {
    let svc = service();
    // Several rows share a timestamp so the id tie-breaker is exercised
    for i in 0..47 {
        svc.insert_at(&item(&format!("SKU-{:03}", i)), at(i / 3)).unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let (ids, next, has_more) = page(&svc, 10, cursor);
        seen.extend(ids);
        if !has_more {
            break;
        }
        cursor = next;
    }

    assert_eq!(seen.len(), 47);
    let unique: HashSet<i64> = seen.iter().copied().collect();
    assert_eq!(unique.len(), 47);
    let expected: Vec<i64> = (1..=47).rev().collect();
    assert_eq!(seen, expected);
}

/// Rows inserted mid-walk appear neither as duplicates nor shift later pages
#[test]
fn test_inserts_during_walk_do_not_drift() {
    let svc = service();
    for i in 0..6 {
        svc.insert_at(&item(&format!("OLD-{}", i)), at(i)).unwrap();
    }

    let (first, cursor, _) = page(&svc, 2, None);
    assert_eq!(first, vec![6, 5]);

    // Newer rows land ahead of the cursor
    for i in 0..5 {
        svc.insert_at(&item(&format!("NEW-{}", i)), at(100 + i)).unwrap();
    }

    let (second, cursor, _) = page(&svc, 2, cursor);
    assert_eq!(second, vec![4, 3]);
    let (third, cursor, has_more) = page(&svc, 2, cursor);
    assert_eq!(third, vec![2, 1]);
    assert!(!has_more);
    assert!(cursor.is_none());
}

/// Filters combine with the cursor boundary
#[test]
fn test_filtered_walk() {
    let svc = service();
    for i in 0..10 {
        let mut new = item(&format!("S-{}", i));
        new.category = Some(if i % 2 == 0 { "even" } else { "odd" }.to_string());
        svc.insert_at(&new, at(i)).unwrap();
    }

    let query = |cursor: Option<String>| ListQuery {
        category: Some("even".to_string()),
        limit: Some("3".to_string()),
        cursor,
        ..Default::default()
    };

    let first = svc.list(&query(None)).unwrap();
    let ids: Vec<i64> = first.items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![9, 7, 5]);

    let second = svc.list(&query(first.next_cursor)).unwrap();
    let ids: Vec<i64> = second.items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![3, 1]);
    assert!(!second.has_more);
}
