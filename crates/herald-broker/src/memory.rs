//! In-process broker on `tokio::sync::broadcast`.
//!
//! Same delivery contract as Redis pub/sub: exact-channel fan-out to current
//! subscribers, no persistence, no replay. A subscriber that falls more than
//! `capacity` messages behind loses the overflow.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use herald_core::{BrokerError, Channel};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::{Broker, Subscription};

/// In-process pub/sub broker.
#[derive(Clone)]
pub struct MemoryBroker {
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl MemoryBroker {
    /// Create a broker whose per-channel buffer holds `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.channels
            .get(channel.as_str())
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, channel: &Channel, payload: &str) -> Result<(), BrokerError> {
        if let Some(tx) = self.channels.get(channel.as_str()) {
            // No receivers is not an error: the message is simply dropped.
            let _ = tx.send(payload.to_owned());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &Channel) -> Result<Subscription, BrokerError> {
        let rx = self
            .channels
            .entry(channel.as_str().to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let name = channel.to_string();
        let messages = BroadcastStream::new(rx).filter_map(move |item| {
            let name = name.clone();
            async move {
                match item {
                    Ok(payload) => Some(payload),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(channel = %name, skipped, "subscriber lagged, messages dropped");
                        None
                    }
                }
            }
        });

        let channels = Arc::clone(&self.channels);
        let key = channel.as_str().to_owned();
        Ok(Subscription::new(channel.clone(), messages).on_release(move || {
            let _ = channels.remove_if(&key, |_, tx| tx.receiver_count() == 0);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::Identity;

    fn channel(user: &str) -> Channel {
        Identity::new(user).unwrap().channel()
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let broker = MemoryBroker::new(8);
        broker.publish(&channel("nobody"), "lost").await.unwrap();
        assert_eq!(broker.channel_count(), 0);
    }

    #[tokio::test]
    async fn no_replay_for_late_subscribers() {
        let broker = MemoryBroker::new(8);
        let mut early = broker.subscribe(&channel("alice")).await.unwrap();
        broker.publish(&channel("alice"), "first").await.unwrap();

        let mut late = broker.subscribe(&channel("alice")).await.unwrap();
        broker.publish(&channel("alice"), "second").await.unwrap();

        assert_eq!(early.next().await.as_deref(), Some("first"));
        assert_eq!(early.next().await.as_deref(), Some("second"));
        assert_eq!(late.next().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn preserves_publish_order() {
        let broker = MemoryBroker::new(16);
        let mut sub = broker.subscribe(&channel("alice")).await.unwrap();
        for i in 0..5 {
            broker.publish(&channel("alice"), &format!("m{i}")).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(sub.next().await, Some(format!("m{i}")));
        }
    }

    #[tokio::test]
    async fn exact_channel_match_only() {
        let broker = MemoryBroker::new(8);
        let mut star = broker.subscribe(&channel("*")).await.unwrap();
        broker.publish(&channel("alice"), "private").await.unwrap();
        broker.publish(&channel("*"), "literal").await.unwrap();
        assert_eq!(star.next().await.as_deref(), Some("literal"));
    }

    #[tokio::test]
    async fn close_prunes_empty_channel() {
        let broker = MemoryBroker::new(8);
        let mut a = broker.subscribe(&channel("alice")).await.unwrap();
        let mut b = broker.subscribe(&channel("alice")).await.unwrap();
        assert_eq!(broker.subscriber_count(&channel("alice")), 2);

        let _ = a.close();
        assert_eq!(broker.subscriber_count(&channel("alice")), 1);
        assert_eq!(broker.channel_count(), 1);

        let _ = b.close();
        assert_eq!(broker.subscriber_count(&channel("alice")), 0);
        assert_eq!(broker.channel_count(), 0);
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_overflow() {
        let broker = MemoryBroker::new(2);
        let mut sub = broker.subscribe(&channel("alice")).await.unwrap();
        for i in 0..4 {
            broker.publish(&channel("alice"), &format!("m{i}")).await.unwrap();
        }
        assert_eq!(sub.next().await.as_deref(), Some("m2"));
        assert_eq!(sub.next().await.as_deref(), Some("m3"));
    }
}
