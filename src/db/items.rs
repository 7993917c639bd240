//! Catalog record operations
//!
//! The record store owns SKU uniqueness: inserts surface a UNIQUE violation as
//! `DUPLICATE_SKU` instead of pre-checking, so concurrent creators cannot both win.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::format_timestamp;
use crate::error::{is_unique_violation, ErrorCode, IntakeError};

/// Lifecycle status of a catalog record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Active,
    Inactive,
    Archived,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 3] = [Self::Active, Self::Inactive, Self::Archived];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl ToSql for ItemStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ItemStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Self::parse(text).ok_or_else(|| FromSqlError::Other(format!("unknown item status '{}'", text).into()))
    }
}

/// Catalog record row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRow {
    pub id: i64,
    pub sku: String,
    pub title: String,
    pub status: ItemStatus,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub version: i64,
}

impl ItemRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            sku: row.get("sku")?,
            title: row.get("title")?,
            status: row.get("status")?,
            brand: row.get("brand")?,
            category: row.get("category")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            version: row.get("version")?,
        })
    }
}

/// A validated record ready for insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub sku: String,
    pub title: String,
    pub status: ItemStatus,
    pub brand: Option<String>,
    pub category: Option<String>,
}

/// Validated field changes for an update; `None` leaves the column untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemUpdate {
    pub title: Option<String>,
    pub status: Option<ItemStatus>,
    pub brand: Option<String>,
    pub category: Option<String>,
}

impl ItemUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.status.is_none() && self.brand.is_none() && self.category.is_none()
    }
}

/// Exact-match filters for list queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub status: Option<ItemStatus>,
    pub brand: Option<String>,
    pub category: Option<String>,
}

const SELECT_COLUMNS: &str =
    "id, sku, title, status, brand, category, created_at, updated_at, version";

/// Get a record by id
pub fn get_item(conn: &Connection, id: i64) -> Result<Option<ItemRow>, IntakeError> {
    let sql = format!("SELECT {} FROM items WHERE id = ?", SELECT_COLUMNS);
    conn.query_row(&sql, params![id], ItemRow::from_row)
        .optional()
        .map_err(|e| IntakeError::Internal(format!("Query failed: {}", e)))
}

/// Insert a single record in its own transaction
///
/// A SKU collision rolls the transaction back and returns `DUPLICATE_SKU`.
pub fn insert_item(
    conn: &mut Connection,
    item: &NewItem,
    now: DateTime<Utc>,
) -> Result<ItemRow, IntakeError> {
    let tx = conn.transaction()
        .map_err(|e| IntakeError::Internal(format!("Transaction failed: {}", e)))?;

    let ts = format_timestamp(&now);
    let inserted = tx.execute(
        r#"
        INSERT INTO items (sku, title, status, brand, category, created_at, updated_at, version)
        VALUES (?, ?, ?, ?, ?, ?, ?, 1)
        "#,
        params![item.sku, item.title, item.status, item.brand, item.category, ts, ts],
    );

    if let Err(e) = inserted {
        // Dropping `tx` rolls back
        if is_unique_violation(&e) {
            return Err(IntakeError::conflict(
                ErrorCode::DuplicateSku,
                format!("Item with SKU '{}' already exists", item.sku),
            ));
        }
        return Err(IntakeError::Internal(format!("Insert failed: {}", e)));
    }

    let id = tx.last_insert_rowid();
    let row = get_item(&tx, id)?
        .ok_or_else(|| IntakeError::Internal("Item not found after insert".to_string()))?;

    tx.commit()
        .map_err(|e| IntakeError::Internal(format!("Commit failed: {}", e)))?;

    debug!(id = row.id, sku = %row.sku, "Inserted item");
    Ok(row)
}

/// Apply an optimistic-concurrency update
///
/// Succeeds only when the stored version equals `expected_version`; bumps it by one.
pub fn update_item(
    conn: &mut Connection,
    id: i64,
    expected_version: i64,
    update: &ItemUpdate,
    now: DateTime<Utc>,
) -> Result<ItemRow, IntakeError> {
    let tx = conn.transaction()
        .map_err(|e| IntakeError::Internal(format!("Transaction failed: {}", e)))?;

    let changed = tx.execute(
        r#"
        UPDATE items SET
            title = COALESCE(?, title),
            status = COALESCE(?, status),
            brand = COALESCE(?, brand),
            category = COALESCE(?, category),
            updated_at = ?,
            version = version + 1
        WHERE id = ? AND version = ?
        "#,
        params![
            update.title,
            update.status,
            update.brand,
            update.category,
            format_timestamp(&now),
            id,
            expected_version,
        ],
    ).map_err(|e| IntakeError::Internal(format!("Update failed: {}", e)))?;

    let current = get_item(&tx, id)?;

    match (changed, current) {
        (_, None) => Err(IntakeError::NotFound(format!("Item with ID {} not found", id))),
        (0, Some(row)) => Err(IntakeError::conflict(
            ErrorCode::VersionConflict,
            format!(
                "Item {} is at version {}, request expected version {}",
                id, row.version, expected_version
            ),
        )),
        (_, Some(row)) => {
            tx.commit()
                .map_err(|e| IntakeError::Internal(format!("Commit failed: {}", e)))?;
            Ok(row)
        }
    }
}

/// Fetch up to `fetch` rows in `(created_at DESC, id DESC)` order
///
/// With a boundary, only rows strictly after it in that order are returned. The boundary
/// is compared by value, so rows inserted later never shift the window.
pub fn list_page(
    conn: &Connection,
    filter: &ItemFilter,
    boundary: Option<(&str, i64)>,
    fetch: u32,
) -> Result<Vec<ItemRow>, IntakeError> {
    let mut sql = format!("SELECT {} FROM items", SELECT_COLUMNS);
    let mut params: Vec<Box<dyn ToSql>> = vec![];
    let mut conditions = vec![];

    if let Some(status) = filter.status {
        conditions.push("status = ?".to_string());
        params.push(Box::new(status));
    }

    if let Some(ref brand) = filter.brand {
        conditions.push("brand = ?".to_string());
        params.push(Box::new(brand.clone()));
    }

    if let Some(ref category) = filter.category {
        conditions.push("category = ?".to_string());
        params.push(Box::new(category.clone()));
    }

    if let Some((created_at, id)) = boundary {
        conditions.push("(created_at < ? OR (created_at = ? AND id < ?))".to_string());
        params.push(Box::new(created_at.to_string()));
        params.push(Box::new(created_at.to_string()));
        params.push(Box::new(id));
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");
    params.push(Box::new(fetch as i64));

    debug!("Executing query: {}", sql);

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| IntakeError::Internal(format!("Prepare failed: {}", e)))?;

    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), ItemRow::from_row)
        .map_err(|e| IntakeError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| IntakeError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Count all records
pub fn count_items(conn: &Connection) -> Result<u64, IntakeError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
    Ok(count as u64)
}
