//! # herald-broker
//!
//! Pub/sub transport behind the relay.
//!
//! - [`Broker`]: process-wide handle, safe for concurrent publish and
//!   independent subscriptions from many sessions
//! - [`publish`]: sends a validated notification to its user's channel
//! - [`subscribe`]: opens the per-identity subscription for a relay session
//! - [`RedisBroker`] for production, [`MemoryBroker`] for tests and single-node runs
//!
//! Delivery is at-most-once with no persistence or replay; a publish with no
//! current subscriber is silently dropped by the broker.

#![deny(unsafe_code)]

pub mod memory;
pub mod redis_pubsub;
pub mod subscription;

use std::sync::Arc;

use async_trait::async_trait;
use herald_core::{BrokerError, Channel, Identity, Notification};
use tracing::{debug, instrument};

pub use memory::MemoryBroker;
pub use redis_pubsub::{RedisBroker, RedisTarget};
pub use subscription::Subscription;

/// A pub/sub broker shared by every relay session.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Backend name for health output and logs.
    fn name(&self) -> &'static str;

    /// Broadcast `payload` to every current subscriber of `channel`.
    async fn publish(&self, channel: &Channel, payload: &str) -> Result<(), BrokerError>;

    /// Subscribe to exactly `channel`. Resolves once the broker confirmed the subscription.
    async fn subscribe(&self, channel: &Channel) -> Result<Subscription, BrokerError>;
}

/// Shared broker handle, constructed once at startup.
pub type SharedBroker = Arc<dyn Broker>;

/// Publish a validated notification to `"notifications:" + user`.
///
/// Success means the broker accepted the message, not that anyone received it.
#[instrument(skip_all, fields(user = %notification.user()))]
pub async fn publish(broker: &dyn Broker, notification: &Notification) -> Result<(), BrokerError> {
    let channel = notification.channel();
    broker.publish(&channel, notification.message()).await?;
    debug!(channel = %channel, len = notification.message().len(), "notification published");
    Ok(())
}

/// Open the relay subscription for `identity`.
#[instrument(skip_all, fields(user = %identity))]
pub async fn subscribe(broker: &dyn Broker, identity: &Identity) -> Result<Subscription, BrokerError> {
    let channel = identity.channel();
    let subscription = broker.subscribe(&channel).await?;
    debug!(channel = %channel, "subscribed");
    Ok(subscription)
}
