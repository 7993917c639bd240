//! Idempotency key table operations
//!
//! `try_insert_pending` is an insert-if-absent: the UNIQUE constraint on `key` decides
//! which of several concurrent requests owns a token. Losers get the existing row back.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use super::format_timestamp;
use crate::error::{is_unique_violation, IntakeError};

/// Lifecycle of an idempotency entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdempotencyState {
    Pending,
    Completed,
}

impl IdempotencyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

impl ToSql for IdempotencyState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for IdempotencyState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(FromSqlError::Other(format!("unknown idempotency state '{}'", other).into())),
        }
    }
}

/// Idempotency key row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRow {
    pub key: String,
    pub request_hash: String,
    pub state: IdempotencyState,
    pub response_status: Option<u16>,
    pub response_body: Option<Vec<u8>>,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub expires_at: String,
}

impl IdempotencyRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            key: row.get("key")?,
            request_hash: row.get("request_hash")?,
            state: row.get("state")?,
            response_status: row.get("response_status")?,
            response_body: row.get("response_body")?,
            created_at: row.get("created_at")?,
            completed_at: row.get("completed_at")?,
            expires_at: row.get("expires_at")?,
        })
    }
}

/// Outcome of an insert-if-absent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This caller now owns the token
    Inserted,
    /// A live entry already holds the token
    Existing(IdempotencyRow),
}

/// Counts over the idempotency table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdempotencyStats {
    pub total_keys: u64,
    pub expired_keys: u64,
    pub pending_keys: u64,
    pub completed_keys: u64,
    pub cleanup_needed: bool,
}

const SELECT_COLUMNS: &str =
    "key, request_hash, state, response_status, response_body, created_at, completed_at, expires_at";

/// Get the entry for a token, expired or not
pub fn get_key(conn: &Connection, key: &str) -> Result<Option<IdempotencyRow>, IntakeError> {
    let sql = format!("SELECT {} FROM idempotency_keys WHERE key = ?", SELECT_COLUMNS);
    conn.query_row(&sql, params![key], IdempotencyRow::from_row)
        .optional()
        .map_err(|e| IntakeError::Internal(format!("Query failed: {}", e)))
}

/// Insert a pending entry unless a live one exists
///
/// An expired entry for the same token is deleted in the same transaction first, so a
/// token becomes reusable as soon as it expires, whether or not it has been swept.
pub fn try_insert_pending(
    conn: &mut Connection,
    key: &str,
    request_hash: &str,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<InsertOutcome, IntakeError> {
    let tx = conn.transaction()
        .map_err(|e| IntakeError::Internal(format!("Transaction failed: {}", e)))?;

    let now_ts = format_timestamp(&now);

    let replaced = tx.execute(
        "DELETE FROM idempotency_keys WHERE key = ? AND expires_at < ?",
        params![key, now_ts],
    ).map_err(|e| IntakeError::Internal(format!("Delete failed: {}", e)))?;

    if replaced > 0 {
        debug!(key = %key, "Replacing expired idempotency key");
    }

    let inserted = tx.execute(
        r#"
        INSERT INTO idempotency_keys (key, request_hash, state, created_at, expires_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
        params![key, request_hash, IdempotencyState::Pending, now_ts, format_timestamp(&expires_at)],
    );

    match inserted {
        Ok(_) => {
            tx.commit()
                .map_err(|e| IntakeError::Internal(format!("Commit failed: {}", e)))?;
            Ok(InsertOutcome::Inserted)
        }
        Err(e) if is_unique_violation(&e) => {
            let existing = get_key(&tx, key)?
                .ok_or_else(|| IntakeError::Internal(format!("Idempotency key '{}' vanished after conflict", key)))?;
            Ok(InsertOutcome::Existing(existing))
        }
        Err(e) => Err(IntakeError::Internal(format!("Insert failed: {}", e))),
    }
}

/// Persist the outcome of the owning request; pending → completed happens once
pub fn mark_completed(
    conn: &Connection,
    key: &str,
    status: u16,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<bool, IntakeError> {
    let changed = conn.execute(
        r#"
        UPDATE idempotency_keys
        SET state = ?, response_status = ?, response_body = ?, completed_at = ?
        WHERE key = ? AND state = ?
        "#,
        params![
            IdempotencyState::Completed,
            status,
            body,
            format_timestamp(&now),
            key,
            IdempotencyState::Pending,
        ],
    ).map_err(|e| IntakeError::Internal(format!("Update failed: {}", e)))?;

    Ok(changed > 0)
}

/// Drop a pending entry so the token can be retried immediately
pub fn delete_pending(conn: &Connection, key: &str) -> Result<bool, IntakeError> {
    let changed = conn.execute(
        "DELETE FROM idempotency_keys WHERE key = ? AND state = ?",
        params![key, IdempotencyState::Pending],
    ).map_err(|e| IntakeError::Internal(format!("Delete failed: {}", e)))?;

    Ok(changed > 0)
}

/// Delete every entry whose expiry has passed, in one statement
pub fn delete_expired(conn: &Connection, now: DateTime<Utc>) -> Result<usize, IntakeError> {
    conn.execute(
        "DELETE FROM idempotency_keys WHERE expires_at < ?",
        params![format_timestamp(&now)],
    ).map_err(|e| IntakeError::Internal(format!("Delete failed: {}", e)))
}

pub fn stats(conn: &Connection, now: DateTime<Utc>) -> Result<IdempotencyStats, IntakeError> {
    let (total, expired, pending, completed): (i64, i64, i64, i64) = conn.query_row(
        r#"
        SELECT
            COUNT(*),
            COALESCE(SUM(CASE WHEN expires_at < ?1 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN state = 'pending' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN state = 'completed' THEN 1 ELSE 0 END), 0)
        FROM idempotency_keys
        "#,
        params![format_timestamp(&now)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    ).map_err(|e| IntakeError::Internal(format!("Query failed: {}", e)))?;

    Ok(IdempotencyStats {
        total_keys: total as u64,
        expired_keys: expired as u64,
        pending_keys: pending as u64,
        completed_keys: completed as u64,
        cleanup_needed: expired > 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;
    use chrono::{Duration, TimeZone};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_insert_then_existing() {
        let mut conn = test_conn();
        let ttl = Duration::hours(1);

        let first = try_insert_pending(&mut conn, "k1", "aa", t0(), t0() + ttl).unwrap();
        assert_eq!(first, InsertOutcome::Inserted);

        let second = try_insert_pending(&mut conn, "k1", "bb", t0(), t0() + ttl).unwrap();
        match second {
            InsertOutcome::Existing(row) => {
                assert_eq!(row.request_hash, "aa");
                assert_eq!(row.state, IdempotencyState::Pending);
                assert!(row.response_body.is_none());
            }
            other => panic!("expected existing row, got {:?}", other),
        }
    }

    #[test]
    fn test_expired_entry_is_replaced() {
        let mut conn = test_conn();
        try_insert_pending(&mut conn, "k1", "aa", t0(), t0() + Duration::minutes(1)).unwrap();

        let later = t0() + Duration::minutes(2);
        let outcome = try_insert_pending(&mut conn, "k1", "bb", later, later + Duration::hours(1)).unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let row = get_key(&conn, "k1").unwrap().unwrap();
        assert_eq!(row.request_hash, "bb");
    }

    #[test]
    fn test_mark_completed_only_once() {
        let mut conn = test_conn();
        try_insert_pending(&mut conn, "k1", "aa", t0(), t0() + Duration::hours(1)).unwrap();

        assert!(mark_completed(&conn, "k1", 201, b"{\"id\":1}", t0()).unwrap());
        assert!(!mark_completed(&conn, "k1", 500, b"{}", t0()).unwrap());

        let row = get_key(&conn, "k1").unwrap().unwrap();
        assert_eq!(row.state, IdempotencyState::Completed);
        assert_eq!(row.response_status, Some(201));
        assert_eq!(row.response_body.as_deref(), Some(&b"{\"id\":1}"[..]));
        assert!(row.completed_at.is_some());

        // Completed entries are not released
        assert!(!delete_pending(&conn, "k1").unwrap());
    }

    #[test]
    fn test_delete_expired_and_stats() {
        let mut conn = test_conn();
        try_insert_pending(&mut conn, "old", "aa", t0(), t0() + Duration::minutes(5)).unwrap();
        try_insert_pending(&mut conn, "new", "bb", t0(), t0() + Duration::hours(2)).unwrap();
        mark_completed(&conn, "new", 201, b"{}", t0()).unwrap();

        let now = t0() + Duration::hours(1);
        let stats = stats(&conn, now).unwrap();
        assert_eq!(stats.total_keys, 2);
        assert_eq!(stats.expired_keys, 1);
        assert_eq!(stats.pending_keys, 1);
        assert_eq!(stats.completed_keys, 1);
        assert!(stats.cleanup_needed);

        assert_eq!(delete_expired(&conn, now).unwrap(), 1);
        assert!(get_key(&conn, "old").unwrap().is_none());
        assert!(get_key(&conn, "new").unwrap().is_some());
    }
}
