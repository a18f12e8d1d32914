//! Read-side liveness monitor.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, close_code};
use futures::{Stream, StreamExt};
use herald_core::TransportError;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

use super::guard::{CloseReason, SessionGuard};

/// Own the read half until the session closes.
///
/// The read deadline starts at `now + pong_wait` and only a Pong moves it.
/// Application frames are read and discarded. Deadline expiry, a read error,
/// a Close frame or end of stream closes `guard`.
///
/// Returns the reason this monitor recorded, or `None` if the session had
/// already been closed from elsewhere.
pub async fn run_keepalive<R, E>(
    mut reader: R,
    pong_wait: Duration,
    guard: SessionGuard,
) -> Option<CloseReason>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let deadline = time::sleep(pong_wait);
    tokio::pin!(deadline);

    let error = loop {
        tokio::select! {
            biased;
            () = guard.closed() => return None,
            () = &mut deadline => break TransportError::LivenessTimeout(pong_wait),
            frame = reader.next() => match frame {
                Some(Ok(Message::Pong(_))) => {
                    trace!("pong received, read deadline extended");
                    deadline.as_mut().reset(Instant::now() + pong_wait);
                }
                Some(Ok(Message::Close(frame))) => {
                    log_close_frame(frame.as_ref());
                    break TransportError::PeerClosed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break TransportError::ReadFailed(e.to_string()),
                None => break TransportError::PeerClosed,
            },
        }
    };

    let reason = CloseReason::from(&error);
    debug!(error = %error, "keepalive monitor closing session");
    guard.close(reason).then_some(reason)
}

fn log_close_frame(frame: Option<&CloseFrame>) {
    match frame {
        Some(frame) if !is_expected_close(frame.code) => {
            warn!(code = frame.code, reason = %frame.reason, "unexpected close code from peer");
        }
        Some(frame) => debug!(code = frame.code, "peer closed connection"),
        None => debug!("peer closed connection without a code"),
    }
}

/// Normal, going-away and abnormal closures are routine client behavior.
fn is_expected_close(code: u16) -> bool {
    matches!(code, close_code::NORMAL | close_code::AWAY | close_code::ABNORMAL)
}
