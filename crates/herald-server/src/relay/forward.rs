//! Write-side relay loop.

use std::fmt::Display;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, close_code};
use futures::{Sink, SinkExt};
use herald_broker::Subscription;
use herald_core::TransportError;
use metrics::counter;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::RelayTiming;
use super::guard::{CloseReason, SessionGuard};
use crate::metrics::{RELAY_HEARTBEATS_SENT_TOTAL, RELAY_MESSAGES_SENT_TOTAL};

/// Lifecycle of a [`RelayLoop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayState {
    /// Forwarding messages and heartbeats.
    Active,
    /// Tearing down: timer stopped, subscription and connection being closed.
    Closing,
    /// Terminal.
    Closed(CloseReason),
}

/// Summary of a finished relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayOutcome {
    /// First recorded reason for the session ending.
    pub reason: CloseReason,
    /// Text frames written.
    pub messages_sent: u64,
    /// Ping frames written.
    pub heartbeats_sent: u64,
}

enum Outbound {
    Message(String),
    Heartbeat,
}

/// Forwards subscription payloads to the write half and pings the peer on a fixed period.
///
/// Never reads from the connection.
pub struct RelayLoop<W> {
    writer: W,
    timing: RelayTiming,
    guard: SessionGuard,
    state: RelayState,
    messages_sent: u64,
    heartbeats_sent: u64,
}

impl<W> RelayLoop<W>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    /// Wrap the write half of a connection.
    pub fn new(writer: W, timing: RelayTiming, guard: SessionGuard) -> Self {
        Self {
            writer,
            timing,
            guard,
            state: RelayState::Active,
            messages_sent: 0,
            heartbeats_sent: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Relay until the session closes, then tear down exactly once.
    ///
    /// Teardown closes `subscription` and the connection. Calling `run` again
    /// after teardown writes nothing and returns the same outcome.
    pub async fn run(&mut self, subscription: &mut Subscription) -> RelayOutcome {
        if self.state == RelayState::Active {
            let reason = self.relay(subscription).await;
            let _ = self.guard.close(reason);
            self.state = RelayState::Closing;

            let reason = self.guard.reason().unwrap_or(reason);
            let _ = subscription.close();
            close_connection(&mut self.writer, close_code_for(reason), self.timing.write_wait)
                .await;
            self.state = RelayState::Closed(reason);
        }
        self.outcome()
    }

    fn outcome(&self) -> RelayOutcome {
        let reason = match self.state {
            RelayState::Closed(reason) => reason,
            RelayState::Active | RelayState::Closing => CloseReason::Shutdown,
        };
        RelayOutcome {
            reason,
            messages_sent: self.messages_sent,
            heartbeats_sent: self.heartbeats_sent,
        }
    }

    async fn relay(&mut self, subscription: &mut Subscription) -> CloseReason {
        let guard = self.guard.clone();
        let period = self.timing.ping_period;
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let outbound = tokio::select! {
                biased;
                () = guard.closed() => {
                    return guard.reason().unwrap_or(CloseReason::Shutdown);
                }
                payload = subscription.next() => match payload {
                    Some(payload) => Outbound::Message(payload),
                    None => {
                        debug!("subscription ended");
                        return CloseReason::SubscriptionEnded;
                    }
                },
                _ = heartbeat.tick() => Outbound::Heartbeat,
            };

            if let Err(error) = self.write(outbound).await {
                debug!(error = %error, "relay write failed");
                return CloseReason::from(&error);
            }
        }
    }

    async fn write(&mut self, outbound: Outbound) -> Result<(), TransportError> {
        let (frame, is_heartbeat) = match outbound {
            Outbound::Message(payload) => (Message::Text(payload.into()), false),
            Outbound::Heartbeat => (Message::Ping(Bytes::new()), true),
        };

        match time::timeout(self.timing.write_wait, self.writer.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(TransportError::WriteFailed(e.to_string())),
            Err(_) => return Err(TransportError::WriteTimedOut(self.timing.write_wait)),
        }

        if is_heartbeat {
            self.heartbeats_sent += 1;
            counter!(RELAY_HEARTBEATS_SENT_TOTAL).increment(1);
            trace!("heartbeat sent");
        } else {
            self.messages_sent += 1;
            counter!(RELAY_MESSAGES_SENT_TOTAL).increment(1);
            trace!("message relayed");
        }
        Ok(())
    }
}

fn close_code_for(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::Shutdown => close_code::AWAY,
        _ => close_code::NORMAL,
    }
}

/// Send a Close frame and close the write half, bounded by `write_wait`.
pub(super) async fn close_connection<W>(writer: &mut W, code: u16, write_wait: Duration)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let frame = CloseFrame {
        code,
        reason: "".into(),
    };
    let closing = async {
        writer.send(Message::Close(Some(frame))).await?;
        writer.close().await
    };
    match time::timeout(write_wait, closing).await {
        Ok(Ok(())) => trace!(code, "connection closed"),
        Ok(Err(e)) => debug!(error = %e, "close frame not delivered"),
        Err(_) => debug!(timeout = ?write_wait, "close frame timed out"),
    }
}
