//! Redis pub/sub backend.
//!
//! Publishes go over one multiplexed connection shared by every caller.
//! Each subscription owns a dedicated pub/sub connection; dropping the
//! subscription's stream closes that connection, which is how the broker side
//! is released.

use async_trait::async_trait;
use futures::StreamExt;
use herald_core::{BrokerError, Channel};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tracing::{info, warn};

use crate::{Broker, Subscription};

/// Where to find the Redis server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisTarget {
    /// Hostname or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Optional `AUTH` password.
    pub password: Option<String>,
    /// Logical database index.
    pub db: i64,
}

impl RedisTarget {
    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                password: self.password.clone().filter(|p| !p.is_empty()),
                ..RedisConnectionInfo::default()
            },
        }
    }

    /// `host:port/db`, without credentials, for logs.
    pub fn display_addr(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Redis-backed broker.
pub struct RedisBroker {
    client: Client,
    publisher: MultiplexedConnection,
}

impl RedisBroker {
    /// Connect eagerly so a misconfigured broker fails at startup rather than on first use.
    pub async fn connect(target: &RedisTarget) -> Result<Self, BrokerError> {
        let client = Client::open(target.connection_info())
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        let publisher = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        info!(addr = %target.display_addr(), "connected to redis");
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, channel: &Channel, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.publisher.clone();
        let _receivers: i64 = conn
            .publish(channel.as_str(), payload)
            .await
            .map_err(|e| BrokerError::Publish {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn subscribe(&self, channel: &Channel) -> Result<Subscription, BrokerError> {
        let subscribe_err = |e: redis::RedisError| BrokerError::Subscribe {
            channel: channel.to_string(),
            message: e.to_string(),
        };

        let mut pubsub = self.client.get_async_pubsub().await.map_err(subscribe_err)?;
        // Exact SUBSCRIBE, never PSUBSCRIBE: a user name containing glob
        // characters must not match other users' channels.
        pubsub.subscribe(channel.as_str()).await.map_err(subscribe_err)?;

        let name = channel.to_string();
        let messages = pubsub.into_on_message().filter_map(move |msg| {
            let name = name.clone();
            async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(channel = %name, error = %e, "dropping undecodable payload");
                        None
                    }
                }
            }
        });

        Ok(Subscription::new(channel.clone(), messages))
    }
}
