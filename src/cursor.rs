//! Opaque pagination cursors
//!
//! A cursor names the last row of a page by its position in the `(created_at DESC,
//! id DESC)` order. On the wire it is `{"created_at": "...", "id": n}` as JSON, then
//! URL-safe base64 without padding. Decoding accepts padded input too.
//!
//! Cursors are not signed; a client that forges one only changes where its own listing
//! starts.

use base64::alphabet::URL_SAFE;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::db::{format_timestamp, parse_timestamp, ItemRow};
use crate::error::{ErrorCode, IntakeError};

const CURSOR_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Why a cursor token was rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorDecodeError {
    #[error("cursor is empty")]
    Empty,

    #[error("cursor is not valid base64")]
    Base64,

    #[error("cursor is not valid UTF-8")]
    Utf8,

    #[error("cursor is not valid JSON")]
    Json,

    #[error("cursor payload must be an object")]
    NotObject,

    #[error("cursor is missing '{0}'")]
    MissingField(&'static str),

    #[error("cursor timestamp is invalid")]
    InvalidTimestamp,

    #[error("cursor id must be a positive integer")]
    InvalidId,
}

impl From<CursorDecodeError> for IntakeError {
    fn from(err: CursorDecodeError) -> Self {
        IntakeError::invalid(ErrorCode::InvalidCursor, format!("Invalid cursor: {}", err))
    }
}

/// Position of a row in the listing order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: i64,
}

impl Cursor {
    pub fn new(created_at: DateTime<Utc>, id: i64) -> Self {
        Self { created_at, id }
    }

    /// Cursor pointing at a stored row
    pub fn for_row(row: &ItemRow) -> Result<Self, IntakeError> {
        let created_at = parse_timestamp(&row.created_at).map_err(|e| {
            IntakeError::Internal(format!("Stored timestamp '{}' unparseable: {}", row.created_at, e))
        })?;
        Ok(Self::new(created_at, row.id))
    }

    /// Canonical timestamp text, comparable with the stored column
    pub fn created_at_key(&self) -> String {
        format_timestamp(&self.created_at)
    }

    pub fn encode(&self) -> String {
        let payload = json!({
            "created_at": self.created_at_key(),
            "id": self.id,
        });
        CURSOR_ENGINE.encode(payload.to_string())
    }

    pub fn decode(token: &str) -> Result<Self, CursorDecodeError> {
        if token.is_empty() {
            return Err(CursorDecodeError::Empty);
        }

        let bytes = CURSOR_ENGINE
            .decode(token)
            .map_err(|_| CursorDecodeError::Base64)?;
        let text = String::from_utf8(bytes).map_err(|_| CursorDecodeError::Utf8)?;
        let value: Value = serde_json::from_str(&text).map_err(|_| CursorDecodeError::Json)?;

        let object = match value {
            Value::Object(map) => map,
            _ => return Err(CursorDecodeError::NotObject),
        };

        let created_at = field(&object, "created_at")?
            .as_str()
            .and_then(|s| parse_timestamp(s).ok())
            .ok_or(CursorDecodeError::InvalidTimestamp)?;

        let id = field(&object, "id")?
            .as_i64()
            .filter(|id| *id > 0)
            .ok_or(CursorDecodeError::InvalidId)?;

        Ok(Self::new(created_at, id))
    }
}

fn field<'a>(object: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, CursorDecodeError> {
    object.get(name).ok_or(CursorDecodeError::MissingField(name))
}
