//! Tests for the token manager.

use async_trait::async_trait;
use chrono::Duration;
use futures::future::join_all;
use mockall::mock;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};
use token_lifecycle::{
    Clock, DefaultTokenManager, InMemoryMetrics, InMemoryTokenStorage, MockClock, MockHttpTransport,
    MockTokenStorage, StorageError, TokenLifecycleError, TokenManager, TokenManagerConfig,
    TokenRecord, TokenRequestBuilders, TokenStorage, TransportError,
};

const KEY: &str = "test.tokens";

fn config() -> TokenManagerConfig {
    TokenManagerConfig {
        storage_key: KEY.to_string(),
        ..Default::default()
    }
}

fn requests() -> TokenRequestBuilders {
    TokenRequestBuilders::oauth2(
        "https://auth.example.com/token",
        "https://auth.example.com/revoke",
        "test-client",
    )
}

fn expired_with_refresh() -> TokenRecord {
    TokenRecord::create_now(
        "A",
        Duration::seconds(-100),
        Some("R".to_string()),
        Some(Duration::seconds(3600)),
    )
}

fn valid_with_refresh() -> TokenRecord {
    TokenRecord::create_now("A", Duration::seconds(3600), Some("R".to_string()), None)
}

async fn manager_with<S: TokenStorage + 'static>(
    transport: Arc<MockHttpTransport>,
    storage: Arc<S>,
) -> DefaultTokenManager<MockHttpTransport, S> {
    let manager = DefaultTokenManager::new(config(), transport, storage, requests());
    manager.wait_until_ready().await;
    manager
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_refresh_preserves_refresh_token_when_not_rotated() {
    let storage = Arc::new(InMemoryTokenStorage::new());
    storage.save(&expired_with_refresh(), KEY).await.unwrap();
    let transport = Arc::new(MockHttpTransport::new());
    transport.queue_json_response(&json!({
        "access_token": "B",
        "access_expires_in": 3600,
        "refresh_token": null
    }));

    let manager = manager_with(transport.clone(), storage.clone()).await;

    assert_eq!(manager.get_valid_access_token(false).await.unwrap(), "B");
    assert_eq!(manager.get_refresh_token().await, Some("R".to_string()));

    let persisted = storage.load(KEY).await.unwrap();
    assert_eq!(persisted.access_token, "B");
    assert_eq!(persisted.refresh_token, Some("R".to_string()));

    let body = transport.get_last_request().unwrap().body.unwrap();
    assert!(body.contains("grant_type=refresh_token"));
    assert!(body.contains("client_id=test-client"));
}

#[tokio::test]
async fn test_empty_storage_is_token_not_found() {
    let manager = manager_with(
        Arc::new(MockHttpTransport::new()),
        Arc::new(InMemoryTokenStorage::new()),
    )
    .await;

    let err = assert_err!(manager.get_valid_access_token(false).await);
    assert_eq!(err, TokenLifecycleError::TokenNotFound);
    assert!(err.needs_reauth());
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let storage = Arc::new(InMemoryTokenStorage::new());
    storage.save(&expired_with_refresh(), KEY).await.unwrap();
    let transport = Arc::new(MockHttpTransport::new());
    transport
        .set_latency(std::time::Duration::from_millis(100))
        .queue_json_response(&json!({"access_token": "B", "expires_in": 3600}));
    let metrics = Arc::new(InMemoryMetrics::new());

    let manager = DefaultTokenManager::with_components(
        config(),
        transport.clone(),
        storage,
        requests(),
        Arc::new(token_lifecycle::SystemClock),
        metrics.clone(),
    );

    let calls = (0..10).map(|_| {
        let manager = manager.clone();
        async move { manager.get_valid_access_token(false).await }
    });
    let results = join_all(calls).await;

    assert_eq!(transport.request_count(), 1);
    for result in results {
        assert_eq!(result.unwrap(), "B");
    }
    assert_eq!(metrics.count("token_refreshes_started_total"), 1);
    assert_eq!(metrics.count("token_refreshes_joined_total"), 9);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_failure() {
    let storage = Arc::new(InMemoryTokenStorage::new());
    storage.save(&expired_with_refresh(), KEY).await.unwrap();
    let transport = Arc::new(MockHttpTransport::new());
    transport
        .set_latency(std::time::Duration::from_millis(50))
        .queue_error(TransportError::from_status(500, "boom"));

    let manager = manager_with(transport.clone(), storage).await;

    let calls = (0..5).map(|_| {
        let manager = manager.clone();
        tokio::spawn(async move { manager.get_valid_access_token(false).await })
    });
    let results: Vec<_> = join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(transport.request_count(), 1);
    let first = results[0].clone().unwrap_err();
    assert!(matches!(first, TokenLifecycleError::RefreshFailed { .. }));
    for result in results {
        assert_eq!(result.unwrap_err(), first);
    }
}

#[tokio::test]
async fn test_unauthorized_refresh_clears_everything() {
    let storage = Arc::new(InMemoryTokenStorage::new());
    storage.save(&expired_with_refresh(), KEY).await.unwrap();
    let transport = Arc::new(MockHttpTransport::new());
    transport.queue_error(TransportError::from_status(401, "invalid_grant"));

    let manager = manager_with(transport, storage.clone()).await;
    let mut subscription = manager.subscribe();
    assert!(subscription.next().await.unwrap().is_some());

    let err = manager.get_valid_access_token(false).await.unwrap_err();
    assert_eq!(err, TokenLifecycleError::RefreshTokenMissing);

    assert!(matches!(
        storage.load(KEY).await,
        Err(StorageError::NotFound { .. })
    ));
    assert_eq!(subscription.next().await, Some(None));
    assert_eq!(manager.get_refresh_token().await, None);
}

#[tokio::test]
async fn test_revoke_failure_still_clears_locally() {
    let storage = Arc::new(InMemoryTokenStorage::new());
    storage.save(&valid_with_refresh(), KEY).await.unwrap();
    let transport = Arc::new(MockHttpTransport::new());
    transport.queue_error(TransportError::ConnectionFailed {
        message: "offline".to_string(),
    });

    let manager = manager_with(transport, storage.clone()).await;

    let err = manager.revoke_tokens().await.unwrap_err();
    match err {
        TokenLifecycleError::RevocationFailed { source } => {
            assert!(matches!(source, TransportError::ConnectionFailed { .. }))
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert_eq!(manager.get_refresh_token().await, None);
    assert!(storage.load(KEY).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_update_is_visible_before_save_completes() {
    let storage = Arc::new(MockTokenStorage::new());
    let gate = Arc::new(Notify::new());
    storage.set_save_gate(Some(gate.clone()));

    let manager = manager_with(Arc::new(MockHttpTransport::new()), storage.clone()).await;
    let mut subscription = manager.subscribe();
    assert_eq!(subscription.next().await, Some(None));

    let update = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .update_tokens(
                    "A".to_string(),
                    Duration::seconds(3600),
                    Some("R".to_string()),
                    None,
                )
                .await
        })
    };

    let published = subscription.next().await.unwrap().unwrap();
    assert_eq!(published.access_token, "A");
    assert_eq!(manager.get_refresh_token().await, Some("R".to_string()));
    assert!(storage.stored(KEY).is_none());

    gate.notify_one();
    assert_ok!(update.await.unwrap());
    assert_eq!(storage.stored(KEY).unwrap().refresh_token, Some("R".to_string()));
}

#[tokio::test]
async fn test_clear_during_pending_save_leaves_stored_record() {
    let storage = Arc::new(MockTokenStorage::new());
    let gate = Arc::new(Notify::new());
    storage.set_save_gate(Some(gate.clone()));

    let manager = manager_with(Arc::new(MockHttpTransport::new()), storage.clone()).await;
    let mut subscription = manager.subscribe();
    assert_eq!(subscription.next().await, Some(None));

    let update = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .update_tokens("A".to_string(), Duration::seconds(3600), None, None)
                .await
        })
    };
    assert!(subscription.next().await.unwrap().is_some());

    // The delete lands while the save is still parked on the gate.
    assert_ok!(manager.clear_tokens().await);
    assert_eq!(subscription.next().await, Some(None));
    assert_eq!(storage.get_delete_history(), vec![KEY.to_string()]);

    gate.notify_one();
    assert_ok!(update.await.unwrap());

    assert!(manager.current_token().await.is_none());
    assert_eq!(storage.stored(KEY).unwrap().access_token, "A");
}

#[tokio::test]
async fn test_clear_cancels_in_flight_refresh() {
    let storage = Arc::new(InMemoryTokenStorage::new());
    storage.save(&expired_with_refresh(), KEY).await.unwrap();
    let transport = Arc::new(MockHttpTransport::new());
    transport
        .set_latency(std::time::Duration::from_secs(30))
        .queue_json_response(&json!({"access_token": "B", "expires_in": 3600}));
    let metrics = Arc::new(InMemoryMetrics::new());

    let manager = DefaultTokenManager::with_components(
        config(),
        transport.clone(),
        storage.clone(),
        requests(),
        Arc::new(token_lifecycle::SystemClock),
        metrics.clone(),
    );

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.get_valid_access_token(false).await })
    };
    wait_for(|| transport.request_count() == 1).await;

    let second = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.get_valid_access_token(false).await })
    };
    wait_for(|| metrics.count("token_refreshes_joined_total") == 1).await;

    manager.clear_tokens().await.unwrap();

    assert_eq!(first.await.unwrap(), Err(TokenLifecycleError::Cancelled));
    assert_eq!(second.await.unwrap(), Err(TokenLifecycleError::Cancelled));
    assert!(manager.current_token().await.is_none());
    assert!(storage.load(KEY).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_refresh_after_clear_starts_fresh() {
    let storage = Arc::new(InMemoryTokenStorage::new());
    let transport = Arc::new(MockHttpTransport::new());
    let manager = manager_with(transport.clone(), storage).await;

    manager
        .update_tokens(
            "A".to_string(),
            Duration::seconds(-1),
            Some("R".to_string()),
            None,
        )
        .await
        .unwrap();
    manager.clear_tokens().await.unwrap();

    let err = manager.get_valid_access_token(true).await.unwrap_err();
    assert_eq!(err, TokenLifecycleError::TokenNotFound);
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn test_clock_drives_validity() {
    let storage = Arc::new(MockTokenStorage::new());
    let clock = Arc::new(MockClock::default());
    storage.add_tokens(
        KEY,
        TokenRecord::create(
            "A",
            Duration::seconds(300),
            Some("R".to_string()),
            None,
            clock.now(),
        ),
    );
    let transport = Arc::new(MockHttpTransport::new());
    transport.queue_json_response(&json!({"access_token": "B", "expires_in": 3600}));

    let manager = DefaultTokenManager::with_components(
        config(),
        transport.clone(),
        storage,
        requests(),
        clock.clone(),
        Arc::new(token_lifecycle::NoOpMetrics),
    );

    assert_eq!(manager.get_valid_access_token(false).await.unwrap(), "A");

    // Inside the 60 second access buffer.
    clock.advance(Duration::seconds(250));
    assert_eq!(manager.get_valid_access_token(false).await.unwrap(), "B");
    assert_eq!(transport.request_count(), 1);
}

mock! {
    pub Store {}

    #[async_trait]
    impl TokenStorage for Store {
        async fn save(&self, record: &TokenRecord, key: &str) -> Result<(), StorageError>;
        async fn load(&self, key: &str) -> Result<TokenRecord, StorageError>;
        async fn delete(&self, key: &str) -> Result<(), StorageError>;
    }
}

#[tokio::test]
async fn test_refresh_persists_rotated_tokens() {
    let mut store = MockStore::new();
    store
        .expect_load()
        .withf(|key| key == KEY)
        .times(1)
        .returning(|_| Ok(expired_with_refresh()));
    store
        .expect_save()
        .withf(|record, key| {
            key == KEY
                && record.access_token == "B"
                && record.refresh_token.as_deref() == Some("R2")
                && record.refresh_expires_at.is_some()
        })
        .times(1)
        .returning(|_, _| Ok(()));
    store.expect_delete().never();

    let transport = Arc::new(MockHttpTransport::new());
    transport.queue_json_response(&json!({
        "access_token": "B",
        "expires_in": 3600,
        "refresh_token": "R2",
        "refresh_token_expires_in": 86400
    }));

    let manager = manager_with(transport, Arc::new(store)).await;
    assert_eq!(manager.get_valid_access_token(false).await.unwrap(), "B");
}

#[tokio::test]
async fn test_load_error_starts_empty() {
    let mut store = MockStore::new();
    store.expect_load().times(1).returning(|_| {
        Err(StorageError::Corrupted {
            message: "not json".to_string(),
        })
    });

    let manager = manager_with(Arc::new(MockHttpTransport::new()), Arc::new(store)).await;

    assert!(manager.is_ready());
    assert_eq!(
        manager.get_valid_access_token(false).await,
        Err(TokenLifecycleError::TokenNotFound)
    );
}
