//! Token Lifecycle
//!
//! Bearer token lifecycle coordination for client applications.
//!
//! # Features
//!
//! - Durable token records behind a pluggable storage port
//! - Buffer-aware validity checks with an injectable clock
//! - Single-flight token refresh (RFC 6749 Section 6)
//! - Server-side revocation with guaranteed local cleanup (RFC 7009)
//! - Latest-value change feed for observers
//! - Bearer header injection and expired-credential recovery
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use token_lifecycle::{
//!     create_transport, token_manager_config, DefaultTokenManager, FileTokenStorage,
//!     TokenManager, TokenRequestBuilders,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = token_manager_config()
//!         .storage_key("my-app.tokens")
//!         .access_token_buffer(chrono::Duration::seconds(120))
//!         .build()?;
//!
//!     let manager = DefaultTokenManager::new(
//!         config,
//!         Arc::new(create_transport(None)?),
//!         Arc::new(FileTokenStorage::new("/var/lib/my-app")),
//!         TokenRequestBuilders::oauth2(
//!             "https://provider.com/token",
//!             "https://provider.com/revoke",
//!             "my-client-id",
//!         ),
//!     );
//!
//!     let token = manager.get_valid_access_token(false).await?;
//!     println!("Authorization: Bearer {}", token);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: token record, validity classification and configuration
//! - `error`: error hierarchy shared by every port
//! - `core`: HTTP transport and clock abstractions
//! - `token`: storage, change feed and the token manager
//! - `auth`: bearer authenticator built on the token manager
//! - `builders`: fluent configuration builders
//! - `telemetry`: metrics interface

pub mod auth;
pub mod builders;
pub mod core;
pub mod error;
pub mod telemetry;
pub mod token;
pub mod types;

// Re-export builders
pub use builders::{
    authenticator_config, token_manager_config, AuthenticatorConfigBuilder,
    TokenManagerConfigBuilder,
};

// Re-export errors
pub use error::{
    get_user_message, ConfigurationError, StorageError, TokenLifecycleError, TokenResult,
    TransportError,
};

// Re-export types
pub use types::{
    // Config
    AuthenticatorConfig, TokenManagerConfig, DEFAULT_STORAGE_KEY,
    // Token
    check_validity, RefreshTokenResponse, TokenRecord, ValidityState,
};

// Re-export core components
pub use core::{
    // Transport
    create_mock_transport, create_transport, HttpMethod, HttpRequest, HttpResponse,
    HttpTransport, MockHttpTransport, ReqwestHttpTransport,
    // Clock
    Clock, MockClock, SystemClock,
};

// Re-export token management
pub use token::{
    // Storage
    create_in_memory_token_storage, create_mock_token_storage, FileTokenStorage,
    InMemoryTokenStorage, MockTokenStorage, TokenStorage,
    // Feed
    TokenFeed, TokenSubscription,
    // Manager
    create_mock_token_manager, DefaultTokenManager, MockTokenManager, RequestBuilder,
    TokenManager, TokenRequestBuilders,
};

// Re-export authentication
pub use auth::{AuthFailureCallback, AuthRecovery, AuthorizedSendError, BearerAuthenticator};

// Re-export telemetry
pub use telemetry::{
    create_in_memory_metrics, no_op_metrics, InMemoryMetrics, MetricEntry, MetricLabels,
    NoOpMetrics, TokenMetrics,
};
