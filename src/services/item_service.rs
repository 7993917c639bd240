//! Item service - single-record create/read/update and cursor pagination
//!
//! Field validation lives here and is shared with the bulk engine, so a record is held to
//! the same rules whichever route it arrives by.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::PageLimits;
use crate::cursor::Cursor;
use crate::db::{items, CatalogDb, ItemFilter, ItemRow, ItemStatus, ItemUpdate, NewItem};
use crate::error::{ErrorCode, IntakeError};
use crate::metrics;

use super::events::{EventBus, IntakeEvent};

pub const MAX_SKU_LEN: usize = 100;
pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_FIELD_LEN: usize = 100;

/// Record as submitted by a client, before validation
///
/// Every field is optional so that a missing field is reported with its own code instead
/// of a generic decode error. Unknown fields are collected in `extra`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemInput {
    pub sku: Option<String>,
    pub title: Option<String>,
    pub status: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ItemInput {
    /// Decode one record; non-objects and wrong-typed fields are `INVALID_DATA`
    pub fn from_value(value: Value) -> Result<Self, IntakeError> {
        if !value.is_object() {
            return Err(IntakeError::invalid(
                ErrorCode::InvalidData,
                "Item must be a JSON object",
            ));
        }
        serde_json::from_value(value).map_err(|e| {
            IntakeError::invalid(ErrorCode::InvalidData, format!("Invalid item data: {}", e))
        })
    }

    /// Names of fields the service does not know, sorted
    pub fn unknown_fields(&self) -> Vec<&str> {
        self.extra.keys().map(String::as_str).collect()
    }
}

/// Body of an update request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemPatch {
    pub version: Option<i64>,
    pub sku: Option<String>,
    pub title: Option<String>,
    pub status: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
}

/// Query parameters of a list request, as received
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub limit: Option<String>,
    pub cursor: Option<String>,
}

/// One page of a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPage {
    pub items: Vec<ItemRow>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

fn check_len(value: &str, max: usize, code: ErrorCode, label: &str) -> Result<(), IntakeError> {
    let len = value.chars().count();
    if len > max {
        return Err(IntakeError::invalid(
            code,
            format!("{} too long: {} characters (max {})", label, len, max),
        ));
    }
    Ok(())
}

fn parse_status(value: &str) -> Result<ItemStatus, IntakeError> {
    ItemStatus::parse(value).ok_or_else(|| {
        IntakeError::invalid(
            ErrorCode::InvalidStatus,
            format!("Invalid status: '{}'. Valid values: active, inactive, archived", value),
        )
    })
}

fn check_title(title: &str) -> Result<(), IntakeError> {
    if title.trim().is_empty() {
        return Err(IntakeError::invalid(ErrorCode::TitleRequired, "Title is required"));
    }
    check_len(title, MAX_TITLE_LEN, ErrorCode::TitleTooLong, "Title")
}

fn check_optional_fields(brand: Option<&str>, category: Option<&str>) -> Result<(), IntakeError> {
    if let Some(brand) = brand {
        check_len(brand, MAX_FIELD_LEN, ErrorCode::FieldTooLong, "Brand")?;
    }
    if let Some(category) = category {
        check_len(category, MAX_FIELD_LEN, ErrorCode::FieldTooLong, "Category")?;
    }
    Ok(())
}

/// Validate a submitted record into an insertable one
///
/// Checks run in a fixed order (sku, title, status, brand, category) and the first
/// failure is reported.
pub fn validate_new(input: &ItemInput) -> Result<NewItem, IntakeError> {
    let sku = match input.sku.as_deref() {
        Some(sku) if !sku.trim().is_empty() => sku,
        _ => return Err(IntakeError::invalid(ErrorCode::SkuRequired, "SKU is required")),
    };
    check_len(sku, MAX_SKU_LEN, ErrorCode::SkuTooLong, "SKU")?;

    let title = match input.title.as_deref() {
        Some(title) => title,
        None => return Err(IntakeError::invalid(ErrorCode::TitleRequired, "Title is required")),
    };
    check_title(title)?;

    let status = match input.status.as_deref() {
        Some(status) => parse_status(status)?,
        None => ItemStatus::default(),
    };

    check_optional_fields(input.brand.as_deref(), input.category.as_deref())?;

    Ok(NewItem {
        sku: sku.to_string(),
        title: title.to_string(),
        status,
        brand: input.brand.clone(),
        category: input.category.clone(),
    })
}

/// Item service for business logic
pub struct ItemService {
    db: Arc<CatalogDb>,
    events: Arc<EventBus>,
    page_limits: PageLimits,
}

impl ItemService {
    pub fn new(db: Arc<CatalogDb>, events: Arc<EventBus>, page_limits: PageLimits) -> Self {
        Self { db, events, page_limits }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, id: i64) -> Result<ItemRow, IntakeError> {
        self.db
            .with_conn(|conn| items::get_item(conn, id))?
            .ok_or_else(|| IntakeError::NotFound(format!("Item with ID {} not found", id)))
    }

    /// One page of the listing in `(created_at DESC, id DESC)` order
    ///
    /// Every parameter is validated before the store is queried; a bad cursor is an error,
    /// never a silent restart from the first page.
    pub fn list(&self, query: &ListQuery) -> Result<ItemPage, IntakeError> {
        let result = self.list_inner(query);
        match &result {
            Ok(page) => metrics::record_page_served(page.has_more),
            Err(e) => metrics::record_page_error(e.code().as_str()),
        }
        result
    }

    fn list_inner(&self, query: &ListQuery) -> Result<ItemPage, IntakeError> {
        let limit = self.parse_limit(query.limit.as_deref())?;

        let filter = ItemFilter {
            status: query.status.as_deref().map(parse_status).transpose()?,
            brand: query.brand.clone(),
            category: query.category.clone(),
        };

        let cursor = query.cursor.as_deref().map(Cursor::decode).transpose()?;
        let boundary_key = cursor.map(|c| (c.created_at_key(), c.id));
        let boundary = boundary_key.as_ref().map(|(ts, id)| (ts.as_str(), *id));

        let mut rows = self
            .db
            .with_conn(|conn| items::list_page(conn, &filter, boundary, limit + 1))?;

        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);

        let next_cursor = match (has_more, rows.last()) {
            (true, Some(last)) => Some(Cursor::for_row(last)?.encode()),
            _ => None,
        };

        debug!(returned = rows.len(), has_more, "Listed items");

        Ok(ItemPage {
            items: rows,
            next_cursor,
            has_more,
        })
    }

    fn parse_limit(&self, raw: Option<&str>) -> Result<u32, IntakeError> {
        let max = self.page_limits.max_limit;
        let Some(raw) = raw else {
            return Ok(self.page_limits.default_limit.clamp(1, max.max(1)));
        };

        match raw.trim().parse::<i64>() {
            Ok(limit) if limit >= 1 && limit <= max as i64 => Ok(limit as u32),
            _ => Err(IntakeError::invalid(
                ErrorCode::InvalidLimit,
                format!("limit must be an integer between 1 and {}", max),
            )),
        }
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Validate and create a single record
    pub fn create(&self, input: &ItemInput) -> Result<ItemRow, IntakeError> {
        let item = validate_new(input)?;
        self.insert_at(&item, Utc::now())
    }

    /// Insert an already-validated record in its own transaction
    pub fn insert_at(&self, item: &NewItem, now: DateTime<Utc>) -> Result<ItemRow, IntakeError> {
        let row = self.db.with_conn_mut(|conn| items::insert_item(conn, item, now))?;

        self.events.emit(IntakeEvent::ItemCreated {
            id: row.id,
            sku: row.sku.clone(),
        });

        Ok(row)
    }

    /// Optimistic-concurrency update; the SKU can never change
    pub fn update(&self, id: i64, patch: &ItemPatch) -> Result<ItemRow, IntakeError> {
        let version = patch.version.ok_or_else(|| {
            IntakeError::invalid(ErrorCode::InvalidBody, "version is required")
        })?;

        if let Some(ref title) = patch.title {
            check_title(title)?;
        }
        let status = patch.status.as_deref().map(parse_status).transpose()?;
        check_optional_fields(patch.brand.as_deref(), patch.category.as_deref())?;

        let update = ItemUpdate {
            title: patch.title.clone(),
            status,
            brand: patch.brand.clone(),
            category: patch.category.clone(),
        };

        let row = self.db.with_conn_mut(|conn| {
            if let Some(ref sku) = patch.sku {
                let current = items::get_item(conn, id)?
                    .ok_or_else(|| IntakeError::NotFound(format!("Item with ID {} not found", id)))?;
                if &current.sku != sku {
                    return Err(IntakeError::invalid(
                        ErrorCode::SkuImmutable,
                        "SKU cannot be changed after creation",
                    ));
                }
            }

            if update.is_empty() {
                return Err(IntakeError::invalid(ErrorCode::InvalidBody, "No fields to update"));
            }

            items::update_item(conn, id, version, &update, Utc::now())
        })?;

        self.events.emit(IntakeEvent::ItemUpdated {
            id: row.id,
            version: row.version,
        });

        Ok(row)
    }

    pub fn count(&self) -> Result<u64, IntakeError> {
        self.db.with_conn(items::count_items)
    }
}

/// Parse a path segment as a record id
pub fn parse_item_id(raw: &str) -> Result<i64, IntakeError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| IntakeError::NotFound(format!("Item with ID {} not found", raw)))
}
