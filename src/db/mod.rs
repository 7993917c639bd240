//! SQLite database module for the catalog record store
//!
//! ## Tables
//!
//! - `items` - Catalog records (id, sku, title, status, brand, category, version)
//! - `idempotency_keys` - In-flight and completed mutating requests keyed by client token
//!
//! Uniqueness of `items.sku` and `idempotency_keys.key` is enforced by the store and is
//! the only arbitration used between concurrent writers.

pub mod schema;
pub mod items;
pub mod idempotency;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::IntakeError;

/// Render a timestamp in the fixed-width form stored in every TEXT time column.
///
/// Microsecond precision with a `Z` suffix, so lexicographic order is chronological.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 timestamp (any offset) into UTC
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc))
}

/// SQLite database for catalog records and idempotency keys
pub struct CatalogDb {
    conn: Mutex<Connection>,
}

impl CatalogDb {
    /// Open or create the catalog database at the given file path
    pub fn open(db_path: &Path) -> Result<Self, IntakeError> {
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)
            .map_err(|e| IntakeError::Internal(format!("Failed to open SQLite: {}", e)))?;

        // WAL keeps readers off the writer's back
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| IntakeError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, IntakeError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| IntakeError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), IntakeError> {
        self.with_conn(schema::init_schema)
    }

    /// Run a read or single-statement operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, IntakeError>
    where
        F: FnOnce(&Connection) -> Result<T, IntakeError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| IntakeError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation that needs its own transaction
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, IntakeError>
    where
        F: FnOnce(&mut Connection) -> Result<T, IntakeError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| IntakeError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Round-trip a trivial query; used by the readiness probe
    pub fn ping(&self) -> Result<(), IntakeError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, IntakeError> {
        self.with_conn(|conn| {
            let item_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
                .map_err(|e| IntakeError::Internal(format!("Query failed: {}", e)))?;

            let idempotency_key_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM idempotency_keys", [], |row| row.get(0))
                .map_err(|e| IntakeError::Internal(format!("Query failed: {}", e)))?;

            Ok(DbStats {
                item_count: item_count as u64,
                idempotency_key_count: idempotency_key_count as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub item_count: u64,
    pub idempotency_key_count: u64,
}

// Re-exports
pub use items::{ItemFilter, ItemRow, ItemStatus, ItemUpdate, NewItem};
pub use idempotency::{IdempotencyRow, IdempotencyState, IdempotencyStats};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-01-15T10:30:00.000000Z");

        let parsed = parse_timestamp("2024-01-15T12:30:00.000123+02:00").unwrap();
        assert_eq!(format_timestamp(&parsed), "2024-01-15T10:30:00.000123Z");
    }

    #[test]
    fn test_open_file_database() {
        let temp_dir = TempDir::new().unwrap();
        let db = CatalogDb::open(&temp_dir.path().join("catalog.db")).unwrap();
        db.ping().unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.item_count, 0);
        assert_eq!(stats.idempotency_key_count, 0);
    }
}
