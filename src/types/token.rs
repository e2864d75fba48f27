//! Token Types
//!
//! The persisted token record, its validity classification and the refresh
//! response shape.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TokenLifecycleError;

/// Access and refresh token pair with absolute expiry instants.
///
/// Records are never mutated; every successful update replaces the record
/// wholesale.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer access token.
    pub access_token: String,
    /// When the access token expires.
    pub access_expires_at: DateTime<Utc>,
    /// Refresh token, if the server issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// When the refresh token expires. `None` means no known expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// Create a record from relative lifetimes measured from `received_at`.
    pub fn create(
        access_token: impl Into<String>,
        access_expires_in: Duration,
        refresh_token: Option<String>,
        refresh_expires_in: Option<Duration>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            access_expires_at: offset(received_at, access_expires_in),
            refresh_token,
            refresh_expires_at: refresh_expires_in.map(|ttl| offset(received_at, ttl)),
        }
    }

    /// Create a record received right now.
    pub fn create_now(
        access_token: impl Into<String>,
        access_expires_in: Duration,
        refresh_token: Option<String>,
        refresh_expires_in: Option<Duration>,
    ) -> Self {
        Self::create(
            access_token,
            access_expires_in,
            refresh_token,
            refresh_expires_in,
            Utc::now(),
        )
    }

    /// Check if has refresh token.
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Remaining access token lifetime, or `None` once expired.
    pub fn access_remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (self.access_expires_at - now).to_std().ok()
    }

    /// Serialize for durable storage.
    pub fn encode(&self) -> Result<Vec<u8>, TokenLifecycleError> {
        serde_json::to_vec(self).map_err(|e| TokenLifecycleError::Encoding {
            message: e.to_string(),
        })
    }

    /// Deserialize a record produced by [`TokenRecord::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, TokenLifecycleError> {
        serde_json::from_slice(bytes).map_err(|e| TokenLifecycleError::Decoding {
            message: e.to_string(),
        })
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[REDACTED]")
            .field("access_expires_at", &self.access_expires_at)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

fn offset(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(if by < Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Freshness of a token record at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidityState {
    /// Access token is usable as-is.
    Valid,
    /// Access token is expired (or inside its buffer) but the refresh token is usable.
    NeedsRefresh,
    /// Neither token is usable; re-authentication is required.
    Invalid,
}

/// Classify a record against buffer-adjusted expiries.
///
/// Buffers are expected to be non-negative; the manager clamps them at
/// construction.
pub fn check_validity(
    record: &TokenRecord,
    access_buffer: Duration,
    refresh_buffer: Duration,
    now: DateTime<Utc>,
) -> ValidityState {
    if offset(record.access_expires_at, -access_buffer) > now {
        return ValidityState::Valid;
    }

    if record.refresh_token.is_none() {
        return ValidityState::Invalid;
    }

    match record.refresh_expires_at {
        Some(expires_at) if offset(expires_at, -refresh_buffer) <= now => ValidityState::Invalid,
        _ => ValidityState::NeedsRefresh,
    }
}

/// Expected body of a successful refresh response.
#[derive(Clone, Debug, Deserialize)]
pub struct RefreshTokenResponse {
    /// New access token.
    pub access_token: String,
    /// Access token lifetime in seconds.
    #[serde(alias = "expires_in")]
    pub access_expires_in: i64,
    /// Rotated refresh token; servers may omit rotation.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Rotated refresh token lifetime in seconds.
    #[serde(default, alias = "refresh_token_expires_in")]
    pub refresh_expires_in: Option<i64>,
}

impl RefreshTokenResponse {
    /// Parse and validate a refresh response body.
    pub fn parse(body: &str) -> Result<Self, TokenLifecycleError> {
        let response: Self =
            serde_json::from_str(body).map_err(|e| TokenLifecycleError::InvalidResponse {
                message: e.to_string(),
            })?;

        if response.access_token.is_empty() {
            return Err(TokenLifecycleError::InvalidResponse {
                message: "access_token is empty".to_string(),
            });
        }

        Ok(response)
    }

    /// Access token lifetime as a duration.
    pub fn access_ttl(&self) -> Result<Duration, TokenLifecycleError> {
        seconds(self.access_expires_in, "access_expires_in")
    }

    /// Refresh token lifetime as a duration, if present.
    pub fn refresh_ttl(&self) -> Result<Option<Duration>, TokenLifecycleError> {
        self.refresh_expires_in
            .map(|secs| seconds(secs, "refresh_expires_in"))
            .transpose()
    }
}

fn seconds(secs: i64, field: &str) -> Result<Duration, TokenLifecycleError> {
    Duration::try_seconds(secs).ok_or_else(|| TokenLifecycleError::InvalidResponse {
        message: format!("{} out of range: {}", field, secs),
    })
}
