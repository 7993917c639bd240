//! Idempotency service - retry-safe mutating requests
//!
//! A request carrying a client token first calls [`IdempotencyService::begin`]. Exactly
//! one caller per live token gets `Proceed`; it runs the operation and then calls
//! `complete` (or `release` after a server error). Everyone else is told to replay the
//! stored response or is refused with a conflict.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::db::idempotency::{self as keys, InsertOutcome};
use crate::db::{CatalogDb, IdempotencyState, IdempotencyStats};
use crate::error::{ErrorCode, IntakeError};
use crate::metrics;

use super::events::{EventBus, IntakeEvent};

/// Longest token accepted
pub const MAX_TOKEN_LEN: usize = 255;

/// Response persisted for a completed token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Why a token cannot be used for this request right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The token was first used with a different body
    FingerprintMismatch,
    /// The first request with this token has not finished
    InFlight,
}

impl ConflictReason {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::FingerprintMismatch => ErrorCode::IdempotencyKeyConflict,
            Self::InFlight => ErrorCode::IdempotencyKeyProcessing,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::FingerprintMismatch => {
                "Idempotency key was already used with a different request body"
            }
            Self::InFlight => "A request with this idempotency key is still being processed",
        }
    }

    pub fn into_error(self) -> IntakeError {
        IntakeError::conflict(self.code(), self.message())
    }
}

/// Result of claiming a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    Proceed,
    Replay(StoredResponse),
    Conflict(ConflictReason),
    InvalidToken,
}

/// True when the token is 1-255 chars of `[A-Za-z0-9_-]`
pub fn validate_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// SHA-256 of the raw request body, lowercase hex
pub fn fingerprint(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Idempotency key store
pub struct IdempotencyService {
    db: Arc<CatalogDb>,
    events: Arc<EventBus>,
    ttl: TimeDelta,
}

impl IdempotencyService {
    pub fn new(db: Arc<CatalogDb>, events: Arc<EventBus>, ttl: Duration) -> Self {
        Self {
            db,
            events,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Claim `token` for a request with this body
    pub fn begin(&self, token: &str, body: &[u8]) -> Result<BeginOutcome, IntakeError> {
        self.begin_at(token, body, Utc::now())
    }

    /// [`begin`](Self::begin) with an explicit clock
    pub fn begin_at(&self, token: &str, body: &[u8], now: DateTime<Utc>) -> Result<BeginOutcome, IntakeError> {
        if !validate_token(token) {
            metrics::record_idempotency_outcome("invalid");
            return Ok(BeginOutcome::InvalidToken);
        }

        let request_hash = fingerprint(body);
        let expires_at = now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let inserted = self.db.with_conn_mut(|conn| {
            keys::try_insert_pending(conn, token, &request_hash, now, expires_at)
        })?;

        let outcome = match inserted {
            InsertOutcome::Inserted => BeginOutcome::Proceed,
            InsertOutcome::Existing(row) if row.request_hash != request_hash => {
                BeginOutcome::Conflict(ConflictReason::FingerprintMismatch)
            }
            InsertOutcome::Existing(row) => match row.state {
                IdempotencyState::Pending => BeginOutcome::Conflict(ConflictReason::InFlight),
                IdempotencyState::Completed => {
                    let (Some(status), Some(body)) = (row.response_status, row.response_body) else {
                        return Err(IntakeError::Internal(format!(
                            "Completed idempotency key '{}' has no stored response",
                            token
                        )));
                    };
                    self.events.emit(IntakeEvent::IdempotencyReplayed {
                        key: token.to_string(),
                        status,
                    });
                    BeginOutcome::Replay(StoredResponse { status, body })
                }
            },
        };

        let label = match &outcome {
            BeginOutcome::Proceed => "proceed",
            BeginOutcome::Replay(_) => "replay",
            BeginOutcome::Conflict(ConflictReason::FingerprintMismatch) => "conflict",
            BeginOutcome::Conflict(ConflictReason::InFlight) => "processing",
            BeginOutcome::InvalidToken => "invalid",
        };
        metrics::record_idempotency_outcome(label);
        debug!(key = %token, outcome = label, "Idempotency key checked");

        Ok(outcome)
    }

    /// Store the response of the request that owns `token`
    pub fn complete(&self, token: &str, status: u16, body: &[u8]) -> Result<(), IntakeError> {
        let now = Utc::now();
        let stored = self.db.with_conn(|conn| keys::mark_completed(conn, token, status, body, now))?;
        if !stored {
            warn!(key = %token, status, "Idempotency key was not pending at completion");
        }
        Ok(())
    }

    /// Forget a pending token so the client may retry it right away
    pub fn release(&self, token: &str) -> Result<bool, IntakeError> {
        let released = self.db.with_conn(|conn| keys::delete_pending(conn, token))?;
        if released {
            metrics::record_idempotency_release();
            debug!(key = %token, "Released idempotency key");
        }
        Ok(released)
    }

    /// Delete every expired entry
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize, IntakeError> {
        self.db.with_conn(|conn| keys::delete_expired(conn, now))
    }

    pub fn stats(&self) -> Result<IdempotencyStats, IntakeError> {
        let now = Utc::now();
        self.db.with_conn(|conn| keys::stats(conn, now))
    }
}
