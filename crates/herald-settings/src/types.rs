//! Settings tree.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Bearer-token verification.
    pub auth: AuthSettings,
    /// Pub/sub broker connection.
    pub broker: BrokerSettings,
    /// Relay session timing.
    pub relay: RelaySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HeraldSettings {
    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.relay.validate()?;
        if self.server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Browser origins allowed for CORS and WebSocket upgrades.
    pub allowed_origins: Vec<String>,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5500,
            allowed_origins: Vec::new(),
            max_message_size: 64 * 1024,
        }
    }
}

/// Token verification settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HMAC secret shared with the token issuer.
    pub jwt_secret: String,
}

/// Which broker implementation to run against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    /// Redis pub/sub.
    #[default]
    Redis,
    /// In-process broker; only sessions in this process see each other's publishes.
    Memory,
}

impl BrokerBackend {
    /// Parse a backend name (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "redis" => Some(Self::Redis),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Broker connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Backend selection.
    pub backend: BrokerBackend,
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Redis password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Redis logical database.
    pub db: i64,
    /// Per-channel buffer of the in-process broker.
    pub channel_capacity: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::Redis,
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            channel_capacity: 256,
        }
    }
}

/// Upper bound for every relay timing value: one hour.
pub const MAX_RELAY_MS: u64 = 3_600_000;

/// Relay session timing, in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Deadline for every outbound frame.
    pub write_wait_ms: u64,
    /// Read deadline, extended by each pong.
    pub pong_wait_ms: u64,
    /// Heartbeat period. Defaults to 9/10 of `pong_wait_ms`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_period_ms: Option<u64>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            write_wait_ms: 10_000,
            pong_wait_ms: 30_000,
            ping_period_ms: None,
        }
    }
}

impl RelaySettings {
    /// Outbound frame deadline.
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Liveness read deadline.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Heartbeat period, explicit or derived from the pong wait.
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(
            self.ping_period_ms
                .unwrap_or_else(|| self.pong_wait_ms.saturating_mul(9) / 10),
        )
    }

    /// Timings must be positive and at most an hour, and a heartbeat must fire
    /// before the peer's read deadline expires.
    pub fn validate(&self) -> Result<()> {
        let bounded = [
            ("writeWaitMs", Some(self.write_wait_ms)),
            ("pongWaitMs", Some(self.pong_wait_ms)),
            ("pingPeriodMs", self.ping_period_ms),
        ];
        for (field, value) in bounded {
            if let Some(ms) = value.filter(|ms| *ms > MAX_RELAY_MS) {
                return Err(SettingsError::InvalidValue(format!(
                    "relay.{field} ({ms}ms) exceeds the {MAX_RELAY_MS}ms limit"
                )));
            }
        }
        if self.write_wait_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.writeWaitMs must be positive".into(),
            ));
        }
        let ping = self.ping_period();
        if ping.is_zero() {
            return Err(SettingsError::InvalidValue(
                "relay.pingPeriodMs must be positive".into(),
            ));
        }
        if ping >= self.pong_wait() {
            return Err(SettingsError::InvalidValue(format!(
                "relay.pingPeriodMs ({}ms) must be shorter than relay.pongWaitMs ({}ms)",
                ping.as_millis(),
                self.pong_wait_ms
            )));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}
