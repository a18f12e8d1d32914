//! Session lifecycle: subscribe, run both halves, tear down.

use std::fmt::Display;

use axum::extract::ws::{Message, close_code};
use futures::{Sink, Stream};
use herald_broker::Broker;
use herald_core::{BrokerError, Identity, SessionId};
use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use super::RelayTiming;
use super::forward::{RelayLoop, RelayOutcome, close_connection};
use super::guard::SessionGuard;
use super::keepalive::run_keepalive;
use crate::metrics::{
    BROKER_ERRORS_TOTAL, RELAY_SESSIONS_ACTIVE, RELAY_SESSIONS_CLOSED_TOTAL, RELAY_SESSIONS_TOTAL,
};

/// Relay `identity`'s channel over an upgraded connection until it closes.
///
/// The subscription is opened before anything is relayed; if that fails the
/// connection is closed with code 1011 and the broker error is returned.
/// Otherwise the keepalive monitor runs as its own task on `reader`, the relay
/// loop runs inline on `writer`, and both stop through one [`SessionGuard`]
/// that also fires when `shutdown` is cancelled.
pub async fn run_session<W, R, E>(
    writer: W,
    reader: R,
    identity: &Identity,
    broker: &dyn Broker,
    timing: RelayTiming,
    shutdown: &CancellationToken,
) -> Result<RelayOutcome, BrokerError>
where
    W: Sink<Message> + Unpin + Send,
    W::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let session_id = SessionId::new();
    let span = info_span!("relay_session", session_id = %session_id, user = %identity);

    async move {
        let mut writer = writer;
        let mut subscription = match herald_broker::subscribe(broker, identity).await {
            Ok(subscription) => subscription,
            Err(error) => {
                warn!(error = %error, "subscribe failed, closing connection");
                counter!(BROKER_ERRORS_TOTAL, "op" => error.op()).increment(1);
                close_connection(&mut writer, close_code::ERROR, timing.write_wait).await;
                return Err(error);
            }
        };

        counter!(RELAY_SESSIONS_TOTAL).increment(1);
        gauge!(RELAY_SESSIONS_ACTIVE).increment(1.0);
        info!(channel = %subscription.channel(), "relay session opened");

        let guard = SessionGuard::child_of(shutdown);
        let monitor = tokio::spawn(
            run_keepalive(reader, timing.pong_wait, guard.clone()).in_current_span(),
        );

        let mut relay = RelayLoop::new(writer, timing, guard);
        let outcome = relay.run(&mut subscription).await;

        if let Err(e) = monitor.await {
            warn!(error = %e, "keepalive monitor task failed");
        }

        gauge!(RELAY_SESSIONS_ACTIVE).decrement(1.0);
        counter!(RELAY_SESSIONS_CLOSED_TOTAL, "reason" => outcome.reason.as_str()).increment(1);
        info!(
            reason = %outcome.reason,
            messages_sent = outcome.messages_sent,
            heartbeats_sent = outcome.heartbeats_sent,
            "relay session closed"
        );
        Ok(outcome)
    }
    .instrument(span)
    .await
}
