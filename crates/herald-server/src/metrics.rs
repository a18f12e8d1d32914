//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Call once at startup, before any metric is recorded. The returned handle
/// renders the `/metrics` body.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names, shared by the relay and the HTTP handlers.

/// Relay sessions opened (counter).
pub const RELAY_SESSIONS_TOTAL: &str = "relay_sessions_total";
/// Relay sessions currently running (gauge).
pub const RELAY_SESSIONS_ACTIVE: &str = "relay_sessions_active";
/// Relay sessions closed (counter, labels: reason).
pub const RELAY_SESSIONS_CLOSED_TOTAL: &str = "relay_sessions_closed_total";
/// Text frames relayed to connections (counter).
pub const RELAY_MESSAGES_SENT_TOTAL: &str = "relay_messages_sent_total";
/// Ping frames sent (counter).
pub const RELAY_HEARTBEATS_SENT_TOTAL: &str = "relay_heartbeats_sent_total";
/// Notifications accepted by the broker (counter).
pub const NOTIFICATIONS_PUBLISHED_TOTAL: &str = "notifications_published_total";
/// Notifications refused at ingress (counter, labels: reason).
pub const NOTIFICATIONS_REJECTED_TOTAL: &str = "notifications_rejected_total";
/// Broker operations that failed (counter, labels: op).
pub const BROKER_ERRORS_TOTAL: &str = "broker_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(NOTIFICATIONS_PUBLISHED_TOTAL).increment(2);
        });
        let output = render(&handle);
        assert!(output.contains("notifications_published_total 2"), "{output}");
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            RELAY_SESSIONS_TOTAL,
            RELAY_SESSIONS_ACTIVE,
            RELAY_SESSIONS_CLOSED_TOTAL,
            RELAY_MESSAGES_SENT_TOTAL,
            RELAY_HEARTBEATS_SENT_TOTAL,
            NOTIFICATIONS_PUBLISHED_TOTAL,
            NOTIFICATIONS_REJECTED_TOTAL,
            BROKER_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
