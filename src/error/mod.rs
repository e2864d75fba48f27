//! Token Lifecycle Error Types
//!
//! Error hierarchy for token storage, transport and lifecycle coordination.
//!
//! Every error here is `Clone`: a single refresh outcome is handed to every
//! caller that joined the in-flight refresh.

use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

/// Root error type for token lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenLifecycleError {
    #[error("No token is currently stored")]
    TokenNotFound,

    #[error("Refresh token is missing, expired or was rejected")]
    RefreshTokenMissing,

    #[error("Token refresh failed: {message}")]
    RefreshFailed { message: String },

    #[error("Invalid refresh response: {message}")]
    InvalidResponse { message: String },

    #[error("Token revocation failed: {source}")]
    RevocationFailed {
        #[source]
        source: TransportError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to encode token record: {message}")]
    Encoding { message: String },

    #[error("Failed to decode token record: {message}")]
    Decoding { message: String },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

impl TokenLifecycleError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TokenNotFound => "TOKEN_NOT_FOUND",
            Self::RefreshTokenMissing => "TOKEN_REFRESH_MISSING",
            Self::RefreshFailed { .. } => "TOKEN_REFRESH_FAILED",
            Self::InvalidResponse { .. } => "TOKEN_INVALID_RESPONSE",
            Self::RevocationFailed { .. } => "TOKEN_REVOCATION_FAILED",
            Self::Storage(_) => "TOKEN_STORAGE",
            Self::Encoding { .. } => "TOKEN_ENCODING",
            Self::Decoding { .. } => "TOKEN_DECODING",
            Self::Cancelled => "TOKEN_CANCELLED",
            Self::Configuration(_) => "TOKEN_CONFIG",
            Self::Unknown { .. } => "TOKEN_UNKNOWN",
        }
    }

    /// Check if error requires re-authentication.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, Self::TokenNotFound | Self::RefreshTokenMissing)
    }

    /// Check if the operation was cancelled rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Wrap an error that is not one of ours as a refresh failure, keeping its description.
    pub fn from_foreign(error: &dyn Display) -> Self {
        Self::RefreshFailed {
            message: error.to_string(),
        }
    }
}

/// Configuration error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },
}

/// Storage error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("No token stored for key: {key}")]
    NotFound { key: String },

    #[error("Read failed: {message}")]
    ReadFailed { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Delete failed: {message}")]
    DeleteFailed { message: String },

    #[error("Corrupted data: {message}")]
    Corrupted { message: String },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },
}

impl StorageError {
    /// Check if the key simply had nothing stored.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Network/transport error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Unauthorized (HTTP 401)")]
    Unauthorized { body: String },

    #[error("Forbidden (HTTP 403)")]
    Forbidden { body: String },

    #[error("HTTP {status}")]
    Status { status: u16, body: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Transport error: {message}")]
    Other { message: String },
}

impl TransportError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 => Self::Unauthorized { body },
            403 => Self::Forbidden { body },
            _ => Self::Status { status, body },
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// The server rejected the credential itself (401 or 403).
    pub fn is_rejection(&self) -> bool {
        self.is_unauthorized() || self.is_forbidden()
    }

    /// HTTP status, when the error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Forbidden { .. } => Some(403),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for token lifecycle operations.
pub type TokenResult<T> = Result<T, TokenLifecycleError>;

/// Get user-friendly error message.
pub fn get_user_message(error: &TokenLifecycleError) -> String {
    match error {
        TokenLifecycleError::TokenNotFound => "You are not signed in. Please sign in.".to_string(),
        TokenLifecycleError::RefreshTokenMissing => {
            "Your session has expired. Please sign in again.".to_string()
        }
        TokenLifecycleError::RefreshFailed { .. } | TokenLifecycleError::InvalidResponse { .. } => {
            "Failed to renew your session. Please try again.".to_string()
        }
        TokenLifecycleError::RevocationFailed { .. } => {
            "You were signed out locally, but the server could not be notified.".to_string()
        }
        TokenLifecycleError::Storage(_)
        | TokenLifecycleError::Encoding { .. }
        | TokenLifecycleError::Decoding { .. } => {
            "Your session could not be saved on this device.".to_string()
        }
        _ => "An authentication error occurred. Please try again.".to_string(),
    }
}
