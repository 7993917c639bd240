//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::IntakeError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), IntakeError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, IntakeError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    ).map_err(|e| IntakeError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), IntakeError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| IntakeError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| IntakeError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), IntakeError> {
    conn.execute_batch(ITEMS_SCHEMA)
        .map_err(|e| IntakeError::Internal(format!("Failed to create items table: {}", e)))?;

    conn.execute_batch(IDEMPOTENCY_SCHEMA)
        .map_err(|e| IntakeError::Internal(format!("Failed to create idempotency table: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| IntakeError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), IntakeError> {
    info!(from_version, "No migration steps registered");
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Catalog records
///
/// AUTOINCREMENT keeps ids monotonic and never reused, even after deletes.
const ITEMS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sku TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'inactive', 'archived')),
    brand TEXT,
    category TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1
);
"#;

/// Idempotency keys
///
/// The UNIQUE constraint on `key` is the mutual-exclusion primitive for retries.
const IDEMPOTENCY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS idempotency_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    request_hash TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending'
        CHECK (state IN ('pending', 'completed')),
    response_status INTEGER,
    response_body BLOB,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    expires_at TEXT NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
-- Keyset pagination walks (created_at DESC, id DESC)
CREATE INDEX IF NOT EXISTS idx_items_created_id ON items(created_at DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_items_status ON items(status, created_at DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_items_brand ON items(brand);
CREATE INDEX IF NOT EXISTS idx_items_category ON items(category);

-- Sweeper deletes by expiry
CREATE INDEX IF NOT EXISTS idx_idempotency_expires_at ON idempotency_keys(expires_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_status_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO items (sku, title, status, created_at, updated_at) VALUES ('A', 'T', 'bogus', 'x', 'x')",
            [],
        );
        assert!(result.is_err());
    }
}
