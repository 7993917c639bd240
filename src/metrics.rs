//! Intake metrics.
//!
//! Counters and histograms for the idempotency store, pagination, bulk ingestion and the
//! sweeper. Values go through the `metrics` facade; installing a recorder is up to the
//! embedding binary.

use metrics::{counter, describe_counter, describe_histogram, histogram};

// ============================================================================
// Idempotency Metrics
// ============================================================================

/// Outcomes of `begin` (proceed, replay, conflict, processing, invalid).
pub const IDEMPOTENCY_OUTCOMES: &str = "catalog_idempotency_outcomes_total";

/// Pending keys released after a server error.
pub const IDEMPOTENCY_RELEASED: &str = "catalog_idempotency_released_total";

// ============================================================================
// Pagination Metrics
// ============================================================================

/// List requests served.
pub const PAGINATION_REQUESTS: &str = "catalog_pagination_requests_total";

/// List requests rejected (bad cursor, limit or filter).
pub const PAGINATION_ERRORS: &str = "catalog_pagination_errors_total";

// ============================================================================
// Bulk Metrics
// ============================================================================

/// Per-record bulk outcomes.
pub const BULK_ITEMS: &str = "catalog_bulk_items_total";

/// Bulk requests by aggregate result.
pub const BULK_REQUESTS: &str = "catalog_bulk_requests_total";

/// Bulk request duration histogram.
pub const BULK_DURATION: &str = "catalog_bulk_duration_seconds";

// ============================================================================
// Sweeper Metrics
// ============================================================================

/// Expired idempotency keys deleted.
pub const SWEEPER_DELETED: &str = "catalog_sweeper_deleted_total";

/// Sweep runs that failed.
pub const SWEEPER_FAILURES: &str = "catalog_sweeper_failures_total";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all intake metric descriptions.
///
/// Call this once at application startup after initializing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(IDEMPOTENCY_OUTCOMES, "Idempotency begin outcomes by kind");
    describe_counter!(IDEMPOTENCY_RELEASED, "Pending idempotency keys released after server errors");
    describe_counter!(PAGINATION_REQUESTS, "List requests served");
    describe_counter!(PAGINATION_ERRORS, "List requests rejected by error code");
    describe_counter!(BULK_ITEMS, "Bulk records processed by status");
    describe_counter!(BULK_REQUESTS, "Bulk requests by aggregate result");
    describe_histogram!(BULK_DURATION, "Duration of bulk requests in seconds");
    describe_counter!(SWEEPER_DELETED, "Expired idempotency keys deleted by the sweeper");
    describe_counter!(SWEEPER_FAILURES, "Sweeper runs that failed");
}

// ============================================================================
// Recording
// ============================================================================

pub fn record_idempotency_outcome(outcome: &'static str) {
    counter!(IDEMPOTENCY_OUTCOMES, "outcome" => outcome).increment(1);
}

pub fn record_idempotency_release() {
    counter!(IDEMPOTENCY_RELEASED).increment(1);
}

pub fn record_page_served(has_more: bool) {
    counter!(PAGINATION_REQUESTS, "has_more" => if has_more { "true" } else { "false" }).increment(1);
}

pub fn record_page_error(code: &str) {
    counter!(PAGINATION_ERRORS, "code" => code.to_string()).increment(1);
}

/// Records a finished bulk request.
pub fn record_bulk_completion(successful: usize, warnings: usize, failed: usize, duration_secs: f64) {
    counter!(BULK_ITEMS, "status" => "success").increment((successful - warnings) as u64);
    counter!(BULK_ITEMS, "status" => "warning").increment(warnings as u64);
    counter!(BULK_ITEMS, "status" => "error").increment(failed as u64);

    let result = if failed == 0 { "complete" } else { "partial" };
    counter!(BULK_REQUESTS, "result" => result).increment(1);
    histogram!(BULK_DURATION).record(duration_secs);
}

/// Records a bulk request rejected before any record was processed.
pub fn record_bulk_rejected(code: &str) {
    counter!(BULK_REQUESTS, "result" => "rejected", "code" => code.to_string()).increment(1);
}

pub fn record_sweep(deleted: usize) {
    counter!(SWEEPER_DELETED).increment(deleted as u64);
}

pub fn record_sweep_failure() {
    counter!(SWEEPER_FAILURES).increment(1);
}
