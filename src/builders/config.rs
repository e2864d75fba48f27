//! Configuration Builder
//!
//! Fluent builders for token manager and authenticator configuration.

use chrono::Duration;

use crate::error::{ConfigurationError, TokenLifecycleError};
use crate::types::{AuthenticatorConfig, TokenManagerConfig};

/// Token manager configuration builder.
pub struct TokenManagerConfigBuilder {
    storage_key: String,
    access_token_buffer: Duration,
    refresh_token_buffer: Duration,
}

impl TokenManagerConfigBuilder {
    /// Create new configuration builder seeded with the defaults.
    pub fn new() -> Self {
        let defaults = TokenManagerConfig::default();
        Self {
            storage_key: defaults.storage_key,
            access_token_buffer: defaults.access_token_buffer,
            refresh_token_buffer: defaults.refresh_token_buffer,
        }
    }

    /// Set storage key.
    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Set access token refresh buffer.
    pub fn access_token_buffer(mut self, buffer: Duration) -> Self {
        self.access_token_buffer = buffer;
        self
    }

    /// Set refresh token buffer.
    pub fn refresh_token_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_token_buffer = buffer;
        self
    }

    /// Build the configuration. Negative buffers are clamped to zero.
    pub fn build(self) -> Result<TokenManagerConfig, TokenLifecycleError> {
        if self.storage_key.trim().is_empty() {
            return Err(TokenLifecycleError::Configuration(
                ConfigurationError::MissingRequired {
                    field: "storage_key".to_string(),
                },
            ));
        }

        Ok(TokenManagerConfig {
            storage_key: self.storage_key,
            access_token_buffer: self.access_token_buffer,
            refresh_token_buffer: self.refresh_token_buffer,
        }
        .clamped())
    }
}

impl Default for TokenManagerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Authenticator configuration builder.
#[derive(Default)]
pub struct AuthenticatorConfigBuilder {
    config: AuthenticatorConfig,
}

impl AuthenticatorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set header name.
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.config.header_name = name.into();
        self
    }

    /// Set token prefix.
    pub fn token_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.token_prefix = prefix.into();
        self
    }

    /// Treat 403 responses as an expired credential.
    pub fn refresh_on_forbidden(mut self, enabled: bool) -> Self {
        self.config.refresh_on_forbidden = enabled;
        self
    }

    pub fn build(self) -> Result<AuthenticatorConfig, TokenLifecycleError> {
        if self.config.header_name.trim().is_empty() {
            return Err(TokenLifecycleError::Configuration(
                ConfigurationError::MissingRequired {
                    field: "header_name".to_string(),
                },
            ));
        }
        Ok(self.config)
    }
}

/// Create a new token manager configuration builder.
pub fn token_manager_config() -> TokenManagerConfigBuilder {
    TokenManagerConfigBuilder::new()
}

/// Create a new authenticator configuration builder.
pub fn authenticator_config() -> AuthenticatorConfigBuilder {
    AuthenticatorConfigBuilder::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_success() {
        let config = token_manager_config()
            .storage_key("my-app.tokens")
            .access_token_buffer(Duration::seconds(120))
            .refresh_token_buffer(Duration::seconds(30))
            .build()
            .unwrap();

        assert_eq!(config.storage_key, "my-app.tokens");
        assert_eq!(config.access_token_buffer, Duration::seconds(120));
        assert_eq!(config.refresh_token_buffer, Duration::seconds(30));
    }

    #[test]
    fn test_builder_clamps_negative_buffers() {
        let config = token_manager_config()
            .access_token_buffer(Duration::seconds(-30))
            .build()
            .unwrap();

        assert_eq!(config.access_token_buffer, Duration::zero());
    }

    #[test]
    fn test_builder_rejects_empty_key() {
        let result = token_manager_config().storage_key("  ").build();
        assert!(matches!(
            result,
            Err(TokenLifecycleError::Configuration(
                ConfigurationError::MissingRequired { .. }
            ))
        ));
    }

    #[test]
    fn test_authenticator_builder() {
        let config = authenticator_config()
            .header_name("X-Api-Token")
            .token_prefix("")
            .refresh_on_forbidden(true)
            .build()
            .unwrap();

        assert_eq!(config.header_name, "X-Api-Token");
        assert_eq!(config.token_prefix, "");
        assert!(config.refresh_on_forbidden);

        assert!(authenticator_config().header_name("").build().is_err());
    }
}
