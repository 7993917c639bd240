//! Bulk service - many independent creates per request
//!
//! The request as a whole is checked first (size, then count, then emptiness) and
//! rejected without touching the store if any check fails. After that every record is
//! decoded, validated and inserted on its own, in index order, each insert in its own
//! transaction. One record's failure never affects its siblings.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::BulkLimits;
use crate::db::ItemRow;
use crate::error::{ErrorCode, IntakeError};
use crate::metrics;

use super::events::{EventBus, IntakeEvent};
use super::item_service::{validate_new, ItemInput, ItemService};

/// Per-record outcome class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkItemStatus {
    Success,
    Error,
    Warning,
}

/// Outcome of one record of a bulk request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub index: usize,
    pub status: BulkItemStatus,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ItemRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    pub duration_ms: u64,
}

impl BulkItemResult {
    pub fn is_success(&self) -> bool {
        self.status != BulkItemStatus::Error
    }
}

/// Aggregate result of a bulk request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCreateResponse {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BulkItemResult>,
}

impl BulkCreateResponse {
    /// 200 when every record succeeded, 207 Multi-Status otherwise
    pub fn status_code(&self) -> u16 {
        if self.failed == 0 {
            200
        } else {
            207
        }
    }
}

/// Limits advertised to clients
#[derive(Debug, Clone, Serialize)]
pub struct BulkLimitsInfo {
    pub max_items: usize,
    pub max_size_mb: usize,
    pub max_size_bytes: usize,
    pub description: &'static str,
}

fn hint_for(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::DuplicateSku => "Use different SKU or update existing item",
        ErrorCode::SkuRequired => "Provide a non-empty 'sku'",
        ErrorCode::SkuTooLong => "Shorten 'sku' to at most 100 characters",
        ErrorCode::TitleRequired => "Provide a non-empty 'title'",
        ErrorCode::TitleTooLong => "Shorten 'title' to at most 255 characters",
        ErrorCode::InvalidStatus => "Use one of: active, inactive, archived",
        ErrorCode::FieldTooLong => "Shorten 'brand' and 'category' to at most 100 characters",
        ErrorCode::InvalidData => "Each item must be an object whose fields are strings",
        _ => "Please try again or contact support",
    }
}

/// Bulk ingestion engine
pub struct BulkService {
    items: Arc<ItemService>,
    events: Arc<EventBus>,
    limits: BulkLimits,
}

impl BulkService {
    pub fn new(items: Arc<ItemService>, events: Arc<EventBus>, limits: BulkLimits) -> Self {
        Self { items, events, limits }
    }

    pub fn limits(&self) -> BulkLimitsInfo {
        BulkLimitsInfo {
            max_items: self.limits.max_items,
            max_size_mb: self.limits.max_bytes / (1024 * 1024),
            max_size_bytes: self.limits.max_bytes,
            description: "Limits for bulk import operations",
        }
    }

    /// Reject a body by size before it is parsed
    pub fn check_size(&self, size: usize) -> Result<(), IntakeError> {
        if size > self.limits.max_bytes {
            metrics::record_bulk_rejected(ErrorCode::RequestTooLarge.as_str());
            return Err(IntakeError::PayloadTooLarge { size, max: self.limits.max_bytes });
        }
        Ok(())
    }

    fn check_count(&self, count: usize) -> Result<(), IntakeError> {
        let rejection = if count > self.limits.max_items {
            Some(IntakeError::TooManyItems { count, max: self.limits.max_items })
        } else if count == 0 {
            Some(IntakeError::EmptyBatch)
        } else {
            None
        };

        match rejection {
            Some(err) => {
                metrics::record_bulk_rejected(err.code().as_str());
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Run a bulk request from its raw body `{"items": [...]}`
    pub fn bulk_create(&self, payload: &[u8]) -> Result<BulkCreateResponse, IntakeError> {
        self.check_size(payload.len())?;

        let body: Value = serde_json::from_slice(payload).map_err(|e| {
            IntakeError::invalid(ErrorCode::InvalidBody, format!("Invalid JSON body: {}", e))
        })?;

        let records = match body {
            Value::Object(mut map) => match map.remove("items") {
                Some(Value::Array(records)) => records,
                _ => {
                    return Err(IntakeError::invalid(
                        ErrorCode::InvalidBody,
                        "Body must contain an 'items' array",
                    ))
                }
            },
            _ => {
                return Err(IntakeError::invalid(
                    ErrorCode::InvalidBody,
                    "Body must be a JSON object",
                ))
            }
        };

        self.process(records)
    }

    /// Process already-decoded records after the count checks
    pub fn process(&self, records: Vec<Value>) -> Result<BulkCreateResponse, IntakeError> {
        self.check_count(records.len())?;

        let started = Instant::now();
        let total = records.len();
        info!(total, "Starting bulk import");

        let results: Vec<BulkItemResult> = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| self.process_record(index, record))
            .collect();

        let successful = results.iter().filter(|r| r.is_success()).count();
        let warnings = results.iter().filter(|r| r.status == BulkItemStatus::Warning).count();
        let failed = total - successful;
        let elapsed = started.elapsed();

        metrics::record_bulk_completion(successful, warnings, failed, elapsed.as_secs_f64());
        self.events.emit(IntakeEvent::BulkCompleted {
            total,
            successful,
            failed,
            duration_ms: elapsed.as_millis() as u64,
        });

        Ok(BulkCreateResponse {
            total,
            successful,
            failed,
            results,
        })
    }

    fn process_record(&self, index: usize, record: Value) -> BulkItemResult {
        let started = Instant::now();

        let outcome = ItemInput::from_value(record).and_then(|input| {
            let item = validate_new(&input)?;
            let row = self.items.insert_at(&item, Utc::now())?;
            let warnings: Vec<String> = input
                .unknown_fields()
                .into_iter()
                .map(|field| format!("Unknown field '{}' ignored", field))
                .collect();
            Ok((row, warnings))
        });

        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((row, warnings)) => BulkItemResult {
                index,
                status: if warnings.is_empty() { BulkItemStatus::Success } else { BulkItemStatus::Warning },
                status_code: 201,
                data: Some(row),
                error_code: None,
                error_message: None,
                hint: None,
                warnings: if warnings.is_empty() { None } else { Some(warnings) },
                duration_ms,
            },
            Err(err) => {
                let (status_code, message) = if err.is_client_error() {
                    let status = if err.code() == ErrorCode::DuplicateSku { 409 } else { 400 };
                    warn!(index, code = %err.code(), error = %err, "Bulk record rejected");
                    (status, err.to_string())
                } else {
                    error!(index, error = %err, "Bulk record failed");
                    (500, "Failed to create item".to_string())
                };

                BulkItemResult {
                    index,
                    status: BulkItemStatus::Error,
                    status_code,
                    data: None,
                    error_code: Some(err.code()),
                    error_message: Some(message),
                    hint: Some(hint_for(err.code()).to_string()),
                    warnings: None,
                    duration_ms,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageLimits;
    use crate::db::CatalogDb;
    use serde_json::json;

    fn service(limits: BulkLimits) -> BulkService {
        let db = Arc::new(CatalogDb::open_in_memory().unwrap());
        let events = Arc::new(EventBus::new());
        let items = Arc::new(ItemService::new(db, events.clone(), PageLimits::default()));
        BulkService::new(items, events, limits)
    }

    fn payload(items: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({ "items": items })).unwrap()
    }

    #[test]
    fn test_all_success_is_200() {
        let svc = service(BulkLimits::default());
        let resp = svc
            .bulk_create(&payload(json!([
                {"sku": "A", "title": "One"},
                {"sku": "B", "title": "Two", "status": "inactive", "brand": "acme"},
            ])))
            .unwrap();

        assert_eq!(resp.total, 2);
        assert_eq!(resp.successful, 2);
        assert_eq!(resp.failed, 0);
        assert_eq!(resp.status_code(), 200);
        assert_eq!(resp.results[1].data.as_ref().unwrap().brand.as_deref(), Some("acme"));
    }

    #[test]
    fn test_partial_failure_is_207() {
        let svc = service(BulkLimits::default());
        let resp = svc
            .bulk_create(&payload(json!([
                {"sku": "A", "title": "One"},
                {"sku": "A", "title": "Dup"},
                {"title": "No sku"},
                {"sku": "C", "title": "Three", "status": "bogus"},
                "not an object",
                {"sku": "D", "title": "Four"},
            ])))
            .unwrap();

        assert_eq!(resp.status_code(), 207);
        assert_eq!(resp.successful, 2);
        assert_eq!(resp.failed, 4);
        assert_eq!(resp.successful + resp.failed, resp.total);

        let codes: Vec<Option<ErrorCode>> = resp.results.iter().map(|r| r.error_code).collect();
        assert_eq!(
            codes,
            vec![
                None,
                Some(ErrorCode::DuplicateSku),
                Some(ErrorCode::SkuRequired),
                Some(ErrorCode::InvalidStatus),
                Some(ErrorCode::InvalidData),
                None,
            ]
        );
        assert_eq!(resp.results[1].status_code, 409);
        assert_eq!(resp.results[2].status_code, 400);
        assert_eq!(resp.results[1].hint.as_deref(), Some("Use different SKU or update existing item"));

        for (i, r) in resp.results.iter().enumerate() {
            assert_eq!(r.index, i);
        }
        assert_ne!(resp.results[0].data.as_ref().unwrap().id, resp.results[5].data.as_ref().unwrap().id);
    }

    #[test]
    fn test_unknown_fields_warn() {
        let svc = service(BulkLimits::default());
        let resp = svc
            .bulk_create(&payload(json!([{"sku": "A", "title": "One", "colour": "red"}])))
            .unwrap();

        let result = &resp.results[0];
        assert_eq!(result.status, BulkItemStatus::Warning);
        assert_eq!(result.status_code, 201);
        assert_eq!(result.warnings.as_ref().unwrap(), &vec!["Unknown field 'colour' ignored".to_string()]);
        assert_eq!(resp.successful, 1);
        assert_eq!(resp.status_code(), 200);
    }

    #[test]
    fn test_anchor_checks_in_order() {
        let svc = service(BulkLimits { max_items: 2, max_bytes: 64 });

        let big = payload(json!([{"sku": "A", "title": "x".repeat(100)}]));
        assert!(matches!(svc.bulk_create(&big), Err(IntakeError::PayloadTooLarge { max: 64, .. })));

        let many = payload(json!([{}, {}, {}]));
        assert!(matches!(
            svc.bulk_create(&many),
            Err(IntakeError::TooManyItems { count: 3, max: 2 })
        ));

        assert!(matches!(svc.bulk_create(&payload(json!([]))), Err(IntakeError::EmptyBatch)));
    }

    #[test]
    fn test_malformed_body() {
        let svc = service(BulkLimits::default());
        for body in [&b"not json"[..], b"[1,2]", b"{\"items\": 5}", b"{}"] {
            let err = svc.bulk_create(body).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidBody);
        }
    }

    #[test]
    fn test_limits_info() {
        let info = service(BulkLimits::default()).limits();
        assert_eq!(info.max_items, 1000);
        assert_eq!(info.max_size_mb, 10);
        assert_eq!(info.max_size_bytes, 10 * 1024 * 1024);
    }
}
