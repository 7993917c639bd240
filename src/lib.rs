//! Catalog Intake - retry-safe catalog ingestion over SQLite
//!
//! Three mechanisms carry the correctness guarantees of the service:
//!
//! - **Idempotency keys**: a client token makes a mutating request safe to retry. The
//!   UNIQUE constraint on the token column decides which attempt runs; the others get
//!   the stored response back or a conflict.
//! - **Keyset pagination**: listings walk `(created_at DESC, id DESC)` with an opaque
//!   cursor naming the last row seen, so concurrent inserts never shift a page.
//! - **Bulk ingestion**: up to a bounded number of records per request, one transaction
//!   per record, with a per-record result and a 200/207 aggregate status.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/catalog-intake/
//! ├── catalog.db             # SQLite (items, idempotency_keys, schema_version)
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod error;
pub mod db;
pub mod cursor;
pub mod metrics;
pub mod services;
pub mod sweeper;
pub mod http;

// Re-exports
pub use config::{BulkLimits, Config, PageLimits};
pub use error::{ErrorCode, IntakeError};
pub use db::CatalogDb;
pub use cursor::Cursor;
pub use services::Services;
pub use sweeper::IdempotencySweeper;
pub use http::HttpServer;
