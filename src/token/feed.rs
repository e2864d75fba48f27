//! Token Change Feed
//!
//! Single-slot, latest-value-wins broadcast of the current token record.
//! Subscribers receive the value current at subscription time (once the
//! initial load has published one) and then every later update. A slow
//! subscriber skips intermediate values and only ever sees the latest.

use futures::stream::{self, Stream};
use tokio::sync::watch;

use crate::types::TokenRecord;

#[derive(Clone, Debug, Default)]
struct Slot {
    ready: bool,
    token: Option<TokenRecord>,
}

/// Broadcast of `Option<TokenRecord>` owned by the token manager.
pub struct TokenFeed {
    tx: watch::Sender<Slot>,
}

impl TokenFeed {
    /// Create a feed that has not emitted anything yet.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Slot::default());
        Self { tx }
    }

    /// Replace the slot and notify every subscriber.
    pub fn publish(&self, token: Option<TokenRecord>) {
        self.tx.send_replace(Slot { ready: true, token });
    }

    /// Latest published value, or `None` if nothing was published yet.
    pub fn current(&self) -> Option<Option<TokenRecord>> {
        let slot = self.tx.borrow();
        slot.ready.then(|| slot.token.clone())
    }

    /// Whether an initial value has been published.
    pub fn is_ready(&self) -> bool {
        self.tx.borrow().ready
    }

    /// Wait until an initial value has been published.
    pub async fn wait_ready(&self) {
        let mut rx = self.tx.subscribe();
        // The sender is owned by `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|slot| slot.ready).await;
    }

    /// Subscribe to the feed.
    pub fn subscribe(&self) -> TokenSubscription {
        TokenSubscription {
            rx: self.tx.subscribe(),
            delivered_initial: false,
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for TokenFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// One observer's view of a [`TokenFeed`].
pub struct TokenSubscription {
    rx: watch::Receiver<Slot>,
    delivered_initial: bool,
}

impl TokenSubscription {
    /// Next value from the feed.
    ///
    /// The first call yields the current value immediately if the feed is
    /// ready; later calls wait for the next publish. Returns `None` once the
    /// feed has been dropped.
    pub async fn next(&mut self) -> Option<Option<TokenRecord>> {
        if !self.delivered_initial {
            self.delivered_initial = true;
            let slot = self.rx.borrow_and_update().clone();
            if slot.ready {
                return Some(slot.token);
            }
        }

        loop {
            self.rx.changed().await.ok()?;
            let slot = self.rx.borrow_and_update().clone();
            if slot.ready {
                return Some(slot.token);
            }
        }
    }

    /// Latest value without waiting, or `None` if nothing was published yet.
    pub fn latest(&self) -> Option<Option<TokenRecord>> {
        let slot = self.rx.borrow();
        slot.ready.then(|| slot.token.clone())
    }

    /// Consume the subscription as a stream of values.
    pub fn into_stream(self) -> impl Stream<Item = Option<TokenRecord>> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|value| (value, subscription))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use futures::StreamExt;

    fn record(access: &str) -> TokenRecord {
        TokenRecord::create_now(access, Duration::seconds(3600), None, None)
    }

    #[tokio::test]
    async fn test_not_ready_until_first_publish() {
        let feed = TokenFeed::new();
        assert!(!feed.is_ready());
        assert_eq!(feed.current(), None);

        feed.publish(None);
        assert!(feed.is_ready());
        assert_eq!(feed.current(), Some(None));
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_latest_only() {
        let feed = TokenFeed::new();
        feed.publish(Some(record("A")));
        feed.publish(Some(record("B")));

        let mut subscription = feed.subscribe();
        let first = subscription.next().await.unwrap().unwrap();
        assert_eq!(first.access_token, "B");

        feed.publish(None);
        assert_eq!(subscription.next().await, Some(None));
    }

    #[tokio::test]
    async fn test_every_subscriber_is_notified() {
        let feed = TokenFeed::new();
        let mut a = feed.subscribe();
        let mut b = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 2);

        feed.publish(Some(record("A")));

        assert_eq!(a.next().await.unwrap().unwrap().access_token, "A");
        assert_eq!(b.next().await.unwrap().unwrap().access_token, "A");
    }

    #[tokio::test]
    async fn test_subscription_before_ready_waits_for_initial_value() {
        let feed = TokenFeed::new();
        let subscription = feed.subscribe();
        assert_eq!(subscription.latest(), None);

        let waiter = tokio::spawn(async move {
            let mut subscription = subscription;
            subscription.next().await
        });

        tokio::task::yield_now().await;
        feed.publish(Some(record("A")));

        let value = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(value.access_token, "A");
    }

    #[tokio::test]
    async fn test_stream_ends_when_feed_dropped() {
        let feed = TokenFeed::new();
        feed.publish(None);
        let stream = feed.subscribe().into_stream();
        drop(feed);

        let values: Vec<_> = stream.collect().await;
        assert_eq!(values, vec![None]);
    }

    #[tokio::test]
    async fn test_wait_ready_returns_after_publish() {
        let feed = std::sync::Arc::new(TokenFeed::new());
        let waiter = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.wait_ready().await })
        };

        feed.publish(None);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
