//! Service layer for catalog-intake
//!
//! Services encapsulate business logic between HTTP handlers and the record store.
//! Each service wraps database operations with:
//! - Input validation
//! - Event emission for audit
//! - Transaction boundaries
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Service Layer (idempotency, items/pagination, bulk)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod response;
pub mod events;
pub mod idempotency_service;
pub mod item_service;
pub mod bulk_service;

// Re-exports
pub use response::*;
pub use events::{EventBus, EventListener, IntakeEvent};
pub use idempotency_service::{BeginOutcome, ConflictReason, IdempotencyService, StoredResponse};
pub use item_service::{ItemInput, ItemPage, ItemPatch, ItemService, ListQuery};
pub use bulk_service::{BulkCreateResponse, BulkItemResult, BulkItemStatus, BulkService};

use crate::config::Config;
use crate::db::CatalogDb;
use std::sync::Arc;

/// Service container for dependency injection
///
/// Holds all services with a shared database connection.
/// Pass this to HttpServer for handler access.
pub struct Services {
    pub db: Arc<CatalogDb>,
    pub idempotency: Arc<IdempotencyService>,
    pub items: Arc<ItemService>,
    pub bulk: Arc<BulkService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with shared database
    pub fn new(db: Arc<CatalogDb>, config: &Config) -> Self {
        let events = Arc::new(EventBus::new());
        let items = Arc::new(ItemService::new(db.clone(), events.clone(), config.page_limits()));

        Self {
            idempotency: Arc::new(IdempotencyService::new(
                db.clone(),
                events.clone(),
                config.idempotency_ttl(),
            )),
            bulk: Arc::new(BulkService::new(items.clone(), events.clone(), config.bulk_limits())),
            items,
            db,
            events,
        }
    }
}
