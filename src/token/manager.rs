//! Token Manager
//!
//! Coordinates the lifecycle of a single token identity: the in-memory current
//! record, its durable copy, single-flight refresh, revocation and the change
//! feed.
//!
//! All manager state sits behind one async mutex. Checking for an in-flight
//! refresh and registering a new one happen under the same guard, so two
//! callers can never both start a refresh. Storage and transport calls are
//! made with the guard released.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::core::{Clock, HttpMethod, HttpRequest, HttpTransport, SystemClock};
use crate::error::{TokenLifecycleError, TokenResult};
use crate::telemetry::{NoOpMetrics, TokenMetrics};
use crate::token::feed::{TokenFeed, TokenSubscription};
use crate::token::TokenStorage;
use crate::types::{
    check_validity, RefreshTokenResponse, TokenManagerConfig, TokenRecord, ValidityState,
};

/// Token manager interface.
#[async_trait]
pub trait TokenManager: Send + Sync {
    /// Get a usable access token, refreshing first if it is inside its buffer
    /// or `force_refresh` is set.
    async fn get_valid_access_token(&self, force_refresh: bool) -> TokenResult<String>;

    /// Current refresh token, if any.
    async fn get_refresh_token(&self) -> Option<String>;

    /// Replace the current tokens with freshly acquired ones.
    ///
    /// Memory and subscribers see the new record before the storage save
    /// completes. Storage calls are not ordered against each other: a
    /// [`clear_tokens`](TokenManager::clear_tokens) made while the save is
    /// pending can delete first, leaving this record stored but not held in
    /// memory until the next load.
    async fn update_tokens(
        &self,
        access_token: String,
        access_expires_in: Duration,
        refresh_token: Option<String>,
        refresh_expires_in: Option<Duration>,
    ) -> TokenResult<()>;

    /// Drop the current tokens locally and from storage.
    ///
    /// Does not wait for a save started by an earlier `update_tokens`.
    async fn clear_tokens(&self) -> TokenResult<()>;

    /// Revoke the refresh token server-side, then clear locally.
    async fn revoke_tokens(&self) -> TokenResult<()>;

    /// Observe changes to the current token.
    fn subscribe(&self) -> TokenSubscription;
}

/// Builds an HTTP request from a refresh token.
pub type RequestBuilder = Arc<dyn Fn(&str) -> HttpRequest + Send + Sync>;

/// Caller-supplied factories for refresh and revoke requests.
#[derive(Clone)]
pub struct TokenRequestBuilders {
    refresh: RequestBuilder,
    revoke: RequestBuilder,
}

impl TokenRequestBuilders {
    pub fn new<R, V>(refresh: R, revoke: V) -> Self
    where
        R: Fn(&str) -> HttpRequest + Send + Sync + 'static,
        V: Fn(&str) -> HttpRequest + Send + Sync + 'static,
    {
        Self {
            refresh: Arc::new(refresh),
            revoke: Arc::new(revoke),
        }
    }

    /// Form-encoded `grant_type=refresh_token` (RFC 6749 §6) and token
    /// revocation (RFC 7009) requests for a public client.
    pub fn oauth2(
        token_endpoint: impl Into<String>,
        revocation_endpoint: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        let token_endpoint = token_endpoint.into();
        let revocation_endpoint = revocation_endpoint.into();
        let client_id = client_id.into();
        let revoke_client_id = client_id.clone();

        Self::new(
            move |refresh_token| {
                HttpRequest::new(HttpMethod::Post, token_endpoint.clone())
                    .header("accept", "application/json")
                    .form(&[
                        ("grant_type", "refresh_token"),
                        ("refresh_token", refresh_token),
                        ("client_id", client_id.as_str()),
                    ])
            },
            move |refresh_token| {
                HttpRequest::new(HttpMethod::Post, revocation_endpoint.clone()).form(&[
                    ("token", refresh_token),
                    ("token_type_hint", "refresh_token"),
                    ("client_id", revoke_client_id.as_str()),
                ])
            },
        )
    }

    pub fn build_refresh(&self, refresh_token: &str) -> HttpRequest {
        (self.refresh)(refresh_token)
    }

    pub fn build_revoke(&self, refresh_token: &str) -> HttpRequest {
        (self.revoke)(refresh_token)
    }
}

/// Refresh token captured when a refresh is registered.
struct RefreshGrant {
    refresh_token: String,
    refresh_expires_at: Option<DateTime<Utc>>,
}

type RefreshFuture = Shared<BoxFuture<'static, TokenResult<String>>>;

struct InFlightRefresh {
    id: u64,
    result: RefreshFuture,
    abort: AbortHandle,
}

#[derive(Default)]
struct ManagerState {
    current: Option<TokenRecord>,
    in_flight: Option<InFlightRefresh>,
    next_refresh_id: u64,
}

struct Inner<T: HttpTransport, S: TokenStorage> {
    config: TokenManagerConfig,
    transport: Arc<T>,
    storage: Arc<S>,
    requests: TokenRequestBuilders,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn TokenMetrics>,
    state: Mutex<ManagerState>,
    feed: TokenFeed,
}

/// Default token manager implementation.
///
/// Cloning yields another handle to the same manager.
pub struct DefaultTokenManager<T: HttpTransport, S: TokenStorage> {
    inner: Arc<Inner<T, S>>,
}

impl<T: HttpTransport, S: TokenStorage> Clone for DefaultTokenManager<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, S> DefaultTokenManager<T, S>
where
    T: HttpTransport + 'static,
    S: TokenStorage + 'static,
{
    /// Create a token manager using the wall clock and no metrics.
    ///
    /// Starts loading the stored record in the background; see
    /// [`DefaultTokenManager::wait_until_ready`].
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: TokenManagerConfig,
        transport: Arc<T>,
        storage: Arc<S>,
        requests: TokenRequestBuilders,
    ) -> Self {
        Self::with_components(
            config,
            transport,
            storage,
            requests,
            Arc::new(SystemClock),
            Arc::new(NoOpMetrics),
        )
    }

    /// Create a token manager with a custom clock and metrics sink.
    pub fn with_components(
        config: TokenManagerConfig,
        transport: Arc<T>,
        storage: Arc<S>,
        requests: TokenRequestBuilders,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn TokenMetrics>,
    ) -> Self {
        let inner = Arc::new(Inner {
            config: config.clamped(),
            transport,
            storage,
            requests,
            clock,
            metrics,
            state: Mutex::new(ManagerState::default()),
            feed: TokenFeed::new(),
        });

        let loader = Arc::clone(&inner);
        tokio::spawn(async move { loader.load_initial().await });

        Self { inner }
    }

    /// Wait until the stored record has been loaded.
    ///
    /// Every operation waits for this itself; call it directly only to
    /// observe readiness.
    pub async fn wait_until_ready(&self) {
        self.inner.wait_until_ready().await;
    }

    /// Whether the stored record has been loaded.
    pub fn is_ready(&self) -> bool {
        self.inner.feed.is_ready()
    }

    /// Snapshot of the current record.
    pub async fn current_token(&self) -> Option<TokenRecord> {
        self.inner.wait_until_ready().await;
        self.inner.state.lock().await.current.clone()
    }

    /// The change feed.
    pub fn feed(&self) -> &TokenFeed {
        &self.inner.feed
    }

    /// Active configuration (buffers already clamped).
    pub fn config(&self) -> &TokenManagerConfig {
        &self.inner.config
    }
}

#[async_trait]
impl<T, S> TokenManager for DefaultTokenManager<T, S>
where
    T: HttpTransport + 'static,
    S: TokenStorage + 'static,
{
    async fn get_valid_access_token(&self, force_refresh: bool) -> TokenResult<String> {
        self.inner.get_valid_access_token(force_refresh).await
    }

    async fn get_refresh_token(&self) -> Option<String> {
        self.inner.wait_until_ready().await;
        let state = self.inner.state.lock().await;
        state
            .current
            .as_ref()
            .and_then(|record| record.refresh_token.clone())
    }

    async fn update_tokens(
        &self,
        access_token: String,
        access_expires_in: Duration,
        refresh_token: Option<String>,
        refresh_expires_in: Option<Duration>,
    ) -> TokenResult<()> {
        self.inner.wait_until_ready().await;
        let record = TokenRecord::create(
            access_token,
            access_expires_in,
            refresh_token,
            refresh_expires_in,
            self.inner.clock.now(),
        );

        {
            let mut state = self.inner.state.lock().await;
            state.current = Some(record.clone());
            self.inner.feed.publish(Some(record.clone()));
        }
        info!(storage_key = %self.inner.config.storage_key, "Tokens updated");

        self.inner.persist(&record).await
    }

    async fn clear_tokens(&self) -> TokenResult<()> {
        self.inner.wait_until_ready().await;
        self.inner.clear().await
    }

    async fn revoke_tokens(&self) -> TokenResult<()> {
        self.inner.wait_until_ready().await;
        self.inner.revoke().await
    }

    fn subscribe(&self) -> TokenSubscription {
        self.inner.feed.subscribe()
    }
}

impl<T, S> Inner<T, S>
where
    T: HttpTransport + 'static,
    S: TokenStorage + 'static,
{
    async fn load_initial(&self) {
        let key = &self.config.storage_key;
        let loaded = match self.storage.load(key).await {
            Ok(record) => {
                debug!(storage_key = %key, "Loaded stored tokens");
                Some(record)
            }
            Err(e) if e.is_not_found() => {
                debug!(storage_key = %key, "No stored tokens");
                None
            }
            Err(e) => {
                self.metrics.record_storage_error("load");
                warn!(storage_key = %key, error = %e, "Failed to load stored tokens; starting without tokens");
                None
            }
        };

        let mut state = self.state.lock().await;
        state.current = loaded.clone();
        self.feed.publish(loaded);
    }

    async fn wait_until_ready(&self) {
        if !self.feed.is_ready() {
            self.feed.wait_ready().await;
        }
    }

    async fn get_valid_access_token(self: &Arc<Self>, force_refresh: bool) -> TokenResult<String> {
        self.wait_until_ready().await;

        let refresh = {
            let mut state = self.state.lock().await;

            if let Some(in_flight) = &state.in_flight {
                self.metrics.record_refresh_joined();
                debug!(refresh_id = in_flight.id, "Joining in-flight token refresh");
                in_flight.result.clone()
            } else {
                let record = state
                    .current
                    .as_ref()
                    .ok_or(TokenLifecycleError::TokenNotFound)?;

                if !force_refresh {
                    match check_validity(
                        record,
                        self.config.access_token_buffer,
                        self.config.refresh_token_buffer,
                        self.clock.now(),
                    ) {
                        ValidityState::Valid => return Ok(record.access_token.clone()),
                        ValidityState::Invalid => {
                            debug!("Access and refresh tokens are both unusable");
                            return Err(TokenLifecycleError::RefreshTokenMissing);
                        }
                        ValidityState::NeedsRefresh => {}
                    }
                }

                self.start_refresh(&mut state)?
            }
        };

        refresh.await
    }

    /// Register and spawn a refresh. Caller holds the state guard.
    fn start_refresh(self: &Arc<Self>, state: &mut ManagerState) -> TokenResult<RefreshFuture> {
        let record = state
            .current
            .as_ref()
            .ok_or(TokenLifecycleError::TokenNotFound)?;
        let grant = RefreshGrant {
            refresh_token: record
                .refresh_token
                .clone()
                .ok_or(TokenLifecycleError::RefreshTokenMissing)?,
            refresh_expires_at: record.refresh_expires_at,
        };

        if let Some(expires_at) = record.refresh_expires_at {
            let usable_until = expires_at.checked_sub_signed(self.config.refresh_token_buffer);
            if usable_until.map_or(true, |until| until < self.clock.now()) {
                debug!("Refresh token is expired; not attempting refresh");
                return Err(TokenLifecycleError::RefreshTokenMissing);
            }
        }

        let id = state.next_refresh_id;
        state.next_refresh_id += 1;

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = inner.run_refresh(id, grant).await;
            inner.finish_refresh(id).await;
            result
        });
        let abort = handle.abort_handle();

        let result: RefreshFuture = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(TokenLifecycleError::Cancelled),
                Err(e) => Err(TokenLifecycleError::Unknown {
                    message: format!("token refresh task failed: {}", e),
                }),
            }
        }
        .boxed()
        .shared();

        self.metrics.record_refresh_started();
        debug!(refresh_id = id, "Started token refresh");

        state.in_flight = Some(InFlightRefresh {
            id,
            result: result.clone(),
            abort,
        });

        Ok(result)
    }

    async fn run_refresh(&self, id: u64, grant: RefreshGrant) -> TokenResult<String> {
        let request = self.requests.build_refresh(&grant.refresh_token);

        let result = match self.transport.send(request).await {
            Ok(response) => self.apply_refresh(id, &response.body, grant).await,
            Err(e) if e.is_rejection() => {
                warn!(refresh_id = id, error = %e, "Refresh token rejected; clearing tokens");
                self.clear_after_rejection(id).await
            }
            Err(e) => Err(TokenLifecycleError::from_foreign(&e)),
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(TokenLifecycleError::RefreshTokenMissing) => "rejected",
            Err(TokenLifecycleError::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        self.metrics.record_refresh_result(outcome);

        match &result {
            Ok(_) => info!(refresh_id = id, "Token refresh succeeded"),
            Err(e) => warn!(refresh_id = id, error = %e, "Token refresh failed"),
        }

        result
    }

    async fn apply_refresh(
        &self,
        id: u64,
        body: &str,
        previous: RefreshGrant,
    ) -> TokenResult<String> {
        let response = RefreshTokenResponse::parse(body)?;
        let access_ttl = response.access_ttl()?;
        let refresh_ttl = response.refresh_ttl()?;
        let rotated = response.refresh_token.is_some();

        let mut record = TokenRecord::create(
            response.access_token,
            access_ttl,
            Some(response.refresh_token.unwrap_or(previous.refresh_token)),
            refresh_ttl,
            self.clock.now(),
        );
        // An unrotated refresh token keeps its known expiry.
        if !rotated && refresh_ttl.is_none() {
            record.refresh_expires_at = previous.refresh_expires_at;
        }

        {
            let mut state = self.state.lock().await;
            // A clear that raced the response owns the slot now.
            if state.in_flight.as_ref().map(|f| f.id) != Some(id) {
                return Err(TokenLifecycleError::Cancelled);
            }
            state.current = Some(record.clone());
            self.feed.publish(Some(record.clone()));
        }

        self.persist(&record).await?;
        Ok(record.access_token)
    }

    async fn clear_after_rejection(&self, id: u64) -> TokenResult<String> {
        let had_token = {
            let mut state = self.state.lock().await;
            if state.in_flight.as_ref().map(|f| f.id) != Some(id) {
                return Err(TokenLifecycleError::Cancelled);
            }
            state.in_flight = None;
            let had_token = state.current.take().is_some();
            if had_token {
                self.feed.publish(None);
            }
            had_token
        };

        if had_token {
            self.metrics.record_tokens_cleared();
        }
        if let Err(e) = self.storage.delete(&self.config.storage_key).await {
            self.metrics.record_storage_error("delete");
            warn!(error = %e, "Failed to delete rejected tokens from storage");
        }

        Err(TokenLifecycleError::RefreshTokenMissing)
    }

    async fn finish_refresh(&self, id: u64) {
        let mut state = self.state.lock().await;
        if state.in_flight.as_ref().map(|f| f.id) == Some(id) {
            state.in_flight = None;
        }
    }

    async fn persist(&self, record: &TokenRecord) -> TokenResult<()> {
        self.storage
            .save(record, &self.config.storage_key)
            .await
            .map_err(|e| {
                self.metrics.record_storage_error("save");
                warn!(error = %e, "Failed to persist tokens");
                TokenLifecycleError::Storage(e)
            })
    }

    async fn clear(&self) -> TokenResult<()> {
        let had_token = {
            let mut state = self.state.lock().await;
            if let Some(in_flight) = state.in_flight.take() {
                in_flight.abort.abort();
                debug!(refresh_id = in_flight.id, "Cancelled in-flight token refresh");
            }
            let had_token = state.current.take().is_some();
            if had_token {
                self.feed.publish(None);
            }
            had_token
        };

        if had_token {
            self.metrics.record_tokens_cleared();
            info!(storage_key = %self.config.storage_key, "Tokens cleared");
        }

        self.storage
            .delete(&self.config.storage_key)
            .await
            .map_err(|e| {
                self.metrics.record_storage_error("delete");
                warn!(error = %e, "Failed to delete tokens from storage");
                TokenLifecycleError::Storage(e)
            })
    }

    async fn revoke(&self) -> TokenResult<()> {
        let refresh_token = {
            let state = self.state.lock().await;
            state
                .current
                .as_ref()
                .and_then(|record| record.refresh_token.clone())
        };

        let Some(refresh_token) = refresh_token else {
            debug!("No refresh token to revoke; clearing locally");
            return self.clear().await;
        };

        let request = self.requests.build_revoke(&refresh_token);
        let revoked = self.transport.send(request).await;
        self.metrics.record_revocation(revoked.is_ok());

        self.clear().await?;

        match revoked {
            Ok(_) => {
                info!("Tokens revoked");
                Ok(())
            }
            Err(source) => {
                warn!(error = %source, "Server-side token revocation failed");
                Err(TokenLifecycleError::RevocationFailed { source })
            }
        }
    }
}

/// Mock token manager for testing.
#[derive(Default)]
pub struct MockTokenManager {
    access_results: std::sync::Mutex<Vec<TokenResult<String>>>,
    refresh_token: std::sync::Mutex<Option<String>>,
    calls: std::sync::Mutex<Vec<String>>,
    updates: std::sync::Mutex<Vec<(String, Option<String>)>>,
    feed: TokenFeed,
    failures: std::sync::Mutex<HashMap<&'static str, TokenLifecycleError>>,
}

impl MockTokenManager {
    /// Create new mock token manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result for the next `get_valid_access_token` call.
    pub fn queue_access_result(&self, result: TokenResult<String>) -> &Self {
        self.access_results.lock().unwrap().insert(0, result);
        self
    }

    /// Set the refresh token reported by `get_refresh_token`.
    pub fn set_refresh_token(&self, token: Option<String>) -> &Self {
        *self.refresh_token.lock().unwrap() = token;
        self
    }

    /// Fail the named operation (`update_tokens`, `clear_tokens`, `revoke_tokens`).
    pub fn set_failure(&self, operation: &'static str, error: TokenLifecycleError) -> &Self {
        self.failures.lock().unwrap().insert(operation, error);
        self
    }

    /// Calls made so far, e.g. `get_valid_access_token(force=true)`.
    pub fn get_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Access/refresh token pairs passed to `update_tokens`.
    pub fn get_updates(&self) -> Vec<(String, Option<String>)> {
        self.updates.lock().unwrap().clone()
    }

    fn record_call(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_failure(&self, operation: &'static str) -> TokenResult<()> {
        match self.failures.lock().unwrap().get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TokenManager for MockTokenManager {
    async fn get_valid_access_token(&self, force_refresh: bool) -> TokenResult<String> {
        self.record_call(format!("get_valid_access_token(force={})", force_refresh));
        self.access_results
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(Err(TokenLifecycleError::TokenNotFound))
    }

    async fn get_refresh_token(&self) -> Option<String> {
        self.record_call("get_refresh_token".to_string());
        self.refresh_token.lock().unwrap().clone()
    }

    async fn update_tokens(
        &self,
        access_token: String,
        access_expires_in: Duration,
        refresh_token: Option<String>,
        refresh_expires_in: Option<Duration>,
    ) -> TokenResult<()> {
        self.record_call("update_tokens".to_string());
        self.check_failure("update_tokens")?;

        self.updates
            .lock()
            .unwrap()
            .push((access_token.clone(), refresh_token.clone()));
        *self.refresh_token.lock().unwrap() = refresh_token.clone();
        self.feed.publish(Some(TokenRecord::create_now(
            access_token,
            access_expires_in,
            refresh_token,
            refresh_expires_in,
        )));
        Ok(())
    }

    async fn clear_tokens(&self) -> TokenResult<()> {
        self.record_call("clear_tokens".to_string());
        *self.refresh_token.lock().unwrap() = None;
        self.feed.publish(None);
        self.check_failure("clear_tokens")
    }

    async fn revoke_tokens(&self) -> TokenResult<()> {
        self.record_call("revoke_tokens".to_string());
        *self.refresh_token.lock().unwrap() = None;
        self.feed.publish(None);
        self.check_failure("revoke_tokens")
    }

    fn subscribe(&self) -> TokenSubscription {
        self.feed.subscribe()
    }
}

/// Create mock token manager for testing.
pub fn create_mock_token_manager() -> MockTokenManager {
    MockTokenManager::new()
}
