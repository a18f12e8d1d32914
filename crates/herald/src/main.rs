//! # herald
//!
//! Notification relay binary: loads settings, connects the broker and serves
//! the HTTP/WebSocket surface until SIGINT or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use herald_broker::{MemoryBroker, RedisBroker, RedisTarget, SharedBroker};
use herald_server::HeraldServer;
use herald_server::logging::init_logging;
use herald_server::metrics::install_recorder;
use herald_server::shutdown::wait_for_signal;
use herald_settings::{BrokerBackend, BrokerSettings, HeraldSettings};
use tracing::{info, warn};

/// Herald notification relay.
#[derive(Parser, Debug)]
#[command(name = "herald", about = "Relay published notifications to WebSocket clients")]
struct Cli {
    /// Settings file (defaults to `~/.herald/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Dotenv file consulted for variables the environment does not set.
    #[arg(long, default_value = herald_settings::DOTENV_FILE)]
    env_file: PathBuf,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Broker backend: `redis` or `memory` (overrides settings).
    #[arg(long, value_parser = parse_backend)]
    broker: Option<BrokerBackend>,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(herald_settings::settings_path)
    }

    /// Flags win over every settings layer.
    fn apply(&self, settings: &mut HeraldSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(backend) = self.broker {
            settings.broker.backend = backend;
        }
    }
}

fn parse_backend(name: &str) -> Result<BrokerBackend, String> {
    BrokerBackend::parse(name).ok_or_else(|| format!("unknown broker '{name}', expected redis or memory"))
}

async fn connect_broker(settings: &BrokerSettings) -> Result<SharedBroker> {
    match settings.backend {
        BrokerBackend::Redis => {
            let target = RedisTarget {
                host: settings.host.clone(),
                port: settings.port,
                password: settings.password.clone(),
                db: settings.db,
            };
            let broker = RedisBroker::connect(&target)
                .await
                .with_context(|| format!("failed to connect to redis at {}", target.display_addr()))?;
            Ok(Arc::new(broker))
        }
        BrokerBackend::Memory => {
            warn!("using in-process broker; publishes are visible only within this process");
            Ok(Arc::new(MemoryBroker::new(settings.channel_capacity)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings_path();
    let mut settings = herald_settings::load_settings_from_path(&path, &cli.env_file)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    init_logging(&settings.logging);
    info!(settings = %path.display(), "starting herald");

    let metrics_handle = match install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let broker = connect_broker(&settings.broker).await?;
    let server = HeraldServer::new(&settings, broker, metrics_handle);
    let (addr, handle) = server.listen().await.with_context(|| {
        format!(
            "failed to bind {}:{}",
            settings.server.host, settings.server.port
        )
    })?;
    info!(%addr, "herald ready");

    wait_for_signal().await;
    info!("shutting down");
    server.shutdown().graceful_shutdown(vec![handle], None).await;
    info!("herald stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_broker::Broker;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["herald"]);
        let mut settings = HeraldSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 5500);
        assert_eq!(settings.broker.backend, BrokerBackend::Redis);
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "herald", "--host", "127.0.0.1", "--port", "8080", "--broker", "memory",
        ]);
        let mut settings = HeraldSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.broker.backend, BrokerBackend::Memory);
    }

    #[test]
    fn cli_settings_path() {
        let cli = Cli::parse_from(["herald", "--settings", "/etc/herald.json"]);
        assert_eq!(cli.settings_path(), PathBuf::from("/etc/herald.json"));

        let cli = Cli::parse_from(["herald"]);
        assert!(cli.settings_path().ends_with(".herald/settings.json"));
    }

    #[test]
    fn cli_env_file() {
        let cli = Cli::parse_from(["herald"]);
        assert_eq!(cli.env_file, PathBuf::from(".env"));

        let cli = Cli::parse_from(["herald", "--env-file", "/run/herald.env"]);
        assert_eq!(cli.env_file, PathBuf::from("/run/herald.env"));
    }

    #[test]
    fn cli_rejects_unknown_broker() {
        assert!(Cli::try_parse_from(["herald", "--broker", "kafka"]).is_err());
    }

    #[tokio::test]
    async fn memory_broker_needs_no_server() {
        let settings = BrokerSettings {
            backend: BrokerBackend::Memory,
            ..BrokerSettings::default()
        };
        let broker = connect_broker(&settings).await.unwrap();
        assert_eq!(broker.name(), "memory");
    }

    #[tokio::test]
    async fn unreachable_redis_fails_startup() {
        let settings = BrokerSettings {
            host: "127.0.0.1".into(),
            port: 1,
            ..BrokerSettings::default()
        };
        let err = connect_broker(&settings).await.err().unwrap();
        assert!(err.to_string().contains("127.0.0.1:1/0"), "{err}");
    }
}
