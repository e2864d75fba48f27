//! Configuration Types
//!
//! Token manager and authenticator configuration.

use chrono::Duration;

/// Default storage key for the managed token record.
pub const DEFAULT_STORAGE_KEY: &str = "token_lifecycle.tokens";
/// Default access token refresh buffer.
pub const DEFAULT_ACCESS_TOKEN_BUFFER_SECS: i64 = 60;
/// Default refresh token buffer.
pub const DEFAULT_REFRESH_TOKEN_BUFFER_SECS: i64 = 0;
/// Default header used to carry the access token.
pub const DEFAULT_HEADER_NAME: &str = "Authorization";
/// Default prefix prepended to the access token in the header value.
pub const DEFAULT_TOKEN_PREFIX: &str = "Bearer ";

/// Token manager configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenManagerConfig {
    /// Key under which the record is persisted.
    pub storage_key: String,
    /// Refresh the access token this long before it expires.
    pub access_token_buffer: Duration,
    /// Treat the refresh token as dead this long before it expires.
    pub refresh_token_buffer: Duration,
}

impl TokenManagerConfig {
    /// Copy of this configuration with negative buffers raised to zero.
    pub fn clamped(&self) -> Self {
        Self {
            storage_key: self.storage_key.clone(),
            access_token_buffer: self.access_token_buffer.max(Duration::zero()),
            refresh_token_buffer: self.refresh_token_buffer.max(Duration::zero()),
        }
    }
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            access_token_buffer: Duration::seconds(DEFAULT_ACCESS_TOKEN_BUFFER_SECS),
            refresh_token_buffer: Duration::seconds(DEFAULT_REFRESH_TOKEN_BUFFER_SECS),
        }
    }
}

/// Authentication adapter configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatorConfig {
    /// Header the token is injected into.
    pub header_name: String,
    /// Prefix prepended to the token (note the trailing space in the default).
    pub token_prefix: String,
    /// Whether a 403 counts as an expired credential. 401 always does.
    pub refresh_on_forbidden: bool,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            header_name: DEFAULT_HEADER_NAME.to_string(),
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            refresh_on_forbidden: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TokenManagerConfig::default();
        assert_eq!(config.storage_key, DEFAULT_STORAGE_KEY);
        assert_eq!(config.access_token_buffer, Duration::seconds(60));
        assert_eq!(config.refresh_token_buffer, Duration::zero());

        let auth = AuthenticatorConfig::default();
        assert_eq!(auth.header_name, "Authorization");
        assert_eq!(auth.token_prefix, "Bearer ");
        assert!(!auth.refresh_on_forbidden);
    }

    #[test]
    fn test_clamped_raises_negative_buffers() {
        let config = TokenManagerConfig {
            access_token_buffer: Duration::seconds(-5),
            refresh_token_buffer: Duration::seconds(-1),
            ..Default::default()
        }
        .clamped();

        assert_eq!(config.access_token_buffer, Duration::zero());
        assert_eq!(config.refresh_token_buffer, Duration::zero());
    }
}
