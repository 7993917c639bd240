//! Error types for catalog-intake

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, machine-readable error codes returned in every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidIdempotencyKey,
    IdempotencyKeyConflict,
    IdempotencyKeyProcessing,
    InvalidCursor,
    InvalidLimit,
    InvalidQuery,
    InvalidBody,
    InvalidData,
    SkuRequired,
    SkuTooLong,
    SkuImmutable,
    TitleRequired,
    TitleTooLong,
    InvalidStatus,
    FieldTooLong,
    DuplicateSku,
    VersionConflict,
    NotFound,
    TooManyItems,
    EmptyBatch,
    RequestTooLarge,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidIdempotencyKey => "INVALID_IDEMPOTENCY_KEY",
            Self::IdempotencyKeyConflict => "IDEMPOTENCY_KEY_CONFLICT",
            Self::IdempotencyKeyProcessing => "IDEMPOTENCY_KEY_PROCESSING",
            Self::InvalidCursor => "INVALID_CURSOR",
            Self::InvalidLimit => "INVALID_LIMIT",
            Self::InvalidQuery => "INVALID_QUERY",
            Self::InvalidBody => "INVALID_BODY",
            Self::InvalidData => "INVALID_DATA",
            Self::SkuRequired => "SKU_REQUIRED",
            Self::SkuTooLong => "SKU_TOO_LONG",
            Self::SkuImmutable => "SKU_IMMUTABLE",
            Self::TitleRequired => "TITLE_REQUIRED",
            Self::TitleTooLong => "TITLE_TOO_LONG",
            Self::InvalidStatus => "INVALID_STATUS",
            Self::FieldTooLong => "FIELD_TOO_LONG",
            Self::DuplicateSku => "DUPLICATE_SKU",
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::NotFound => "NOT_FOUND",
            Self::TooManyItems => "TOO_MANY_ITEMS",
            Self::EmptyBatch => "EMPTY_BATCH",
            Self::RequestTooLarge => "REQUEST_TOO_LARGE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("{message}")]
    Invalid { code: ErrorCode, message: String },

    #[error("{message}")]
    Conflict { code: ErrorCode, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("Request too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Too many items: {count} (max {max})")]
    TooManyItems { count: usize, max: usize },

    #[error("Items array cannot be empty")]
    EmptyBatch,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntakeError {
    pub fn invalid(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Invalid { code, message: message.into() }
    }

    pub fn conflict(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Conflict { code, message: message.into() }
    }

    /// Stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Invalid { code, .. } | Self::Conflict { code, .. } => *code,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::PayloadTooLarge { .. } => ErrorCode::RequestTooLarge,
            Self::TooManyItems { .. } => ErrorCode::TooManyItems,
            Self::EmptyBatch => ErrorCode::EmptyBatch,
            Self::Database(_) | Self::Json(_) | Self::Io(_) | Self::Config(_) | Self::Internal(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Errors the client caused and can fix by changing the request
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_) | Self::Json(_) | Self::Io(_) | Self::Config(_) | Self::Internal(_)
        )
    }
}

/// True when a rusqlite error is a UNIQUE / PRIMARY KEY constraint violation
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}
