//! Bearer Authentication
//!
//! Adapter between an outbound HTTP layer and a [`TokenManager`]: injects the
//! current access token into requests and turns an auth-expired response into
//! a forced refresh.
//!
//! # Example
//!
//! ```rust,ignore
//! use token_lifecycle::{BearerAuthenticator, AuthenticatorConfig, HttpMethod, HttpRequest};
//!
//! let auth = BearerAuthenticator::new(manager, AuthenticatorConfig::default())
//!     .on_authentication_failed(|error| eprintln!("sign-in required: {}", error));
//!
//! let response = auth
//!     .send_authorized(&transport, HttpRequest::new(HttpMethod::Get, "https://api.example.com/me"))
//!     .await?;
//! ```

use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::{TokenLifecycleError, TokenResult, TransportError};
use crate::token::TokenManager;
use crate::types::AuthenticatorConfig;

/// Callback invoked when recovering from an expired credential fails.
pub type AuthFailureCallback = Arc<dyn Fn(&TokenLifecycleError) + Send + Sync>;

/// Outcome of [`BearerAuthenticator::handle_auth_expired`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthRecovery {
    /// A new access token is available; the request may be retried.
    Refreshed,
    /// The credential could not be renewed.
    Failed(TokenLifecycleError),
}

impl AuthRecovery {
    pub fn is_refreshed(&self) -> bool {
        matches!(self, Self::Refreshed)
    }
}

/// Error from [`BearerAuthenticator::send_authorized`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizedSendError {
    #[error(transparent)]
    Token(#[from] TokenLifecycleError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Bearer token authenticator.
pub struct BearerAuthenticator<M: TokenManager> {
    manager: Arc<M>,
    config: AuthenticatorConfig,
    on_authentication_failed: Option<AuthFailureCallback>,
}

impl<M: TokenManager> BearerAuthenticator<M> {
    /// Create a new authenticator.
    pub fn new(manager: Arc<M>, config: AuthenticatorConfig) -> Self {
        Self {
            manager,
            config,
            on_authentication_failed: None,
        }
    }

    /// Set the callback fired when the credential cannot be renewed.
    pub fn on_authentication_failed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TokenLifecycleError) + Send + Sync + 'static,
    {
        self.on_authentication_failed = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &AuthenticatorConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<M> {
        &self.manager
    }

    /// Insert the access token header into `request`.
    pub async fn authorize(&self, request: &mut HttpRequest) -> TokenResult<()> {
        let token = self.manager.get_valid_access_token(false).await?;
        request.headers.insert(
            self.config.header_name.clone(),
            format!("{}{}", self.config.token_prefix, token),
        );
        Ok(())
    }

    /// Whether `error` means the access token was not accepted.
    pub fn is_auth_expired(&self, error: &TransportError) -> bool {
        error.is_unauthorized() || (self.config.refresh_on_forbidden && error.is_forbidden())
    }

    /// Force a refresh after the server rejected the access token.
    pub async fn handle_auth_expired(&self) -> AuthRecovery {
        match self.manager.get_valid_access_token(true).await {
            Ok(_) => {
                debug!("Recovered from expired authentication");
                AuthRecovery::Refreshed
            }
            Err(error) => {
                warn!(error = %error, code = error.error_code(), "Authentication recovery failed");
                if let Some(callback) = &self.on_authentication_failed {
                    callback(&error);
                }
                AuthRecovery::Failed(error)
            }
        }
    }

    /// Authorize and send `request`, recovering once from an expired token.
    pub async fn send_authorized<T>(
        &self,
        transport: &T,
        request: HttpRequest,
    ) -> Result<HttpResponse, AuthorizedSendError>
    where
        T: HttpTransport + ?Sized,
    {
        let mut first = request.clone();
        self.authorize(&mut first).await?;

        match transport.send(first).await {
            Err(error) if self.is_auth_expired(&error) => {
                debug!(status = ?error.status(), "Access token rejected; refreshing");
                match self.handle_auth_expired().await {
                    AuthRecovery::Refreshed => {
                        let mut retry = request;
                        self.authorize(&mut retry).await?;
                        Ok(transport.send(retry).await?)
                    }
                    AuthRecovery::Failed(_) => Err(error.into()),
                }
            }
            other => Ok(other?),
        }
    }
}

impl<M: TokenManager> Clone for BearerAuthenticator<M> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            config: self.config.clone(),
            on_authentication_failed: self.on_authentication_failed.clone(),
        }
    }
}
