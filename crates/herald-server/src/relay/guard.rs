//! Close-once coordination between the two halves of a session.

use std::fmt;
use std::sync::{Arc, OnceLock};

use herald_core::TransportError;
use tokio_util::sync::CancellationToken;

/// Why a relay session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The broker ended the subscription stream.
    SubscriptionEnded,
    /// A frame could not be written.
    WriteFailed,
    /// A frame was not written within `write_wait`.
    WriteTimedOut,
    /// The read half returned an error.
    ReadFailed,
    /// No Pong arrived within `pong_wait`.
    LivenessTimeout,
    /// The peer sent Close or the stream ended.
    PeerClosed,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Label used in logs and the `reason` metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SubscriptionEnded => "subscription_ended",
            Self::WriteFailed => "write_failed",
            Self::WriteTimedOut => "write_timed_out",
            Self::ReadFailed => "read_failed",
            Self::LivenessTimeout => "liveness_timeout",
            Self::PeerClosed => "peer_closed",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&TransportError> for CloseReason {
    fn from(error: &TransportError) -> Self {
        match error {
            TransportError::WriteFailed(_) => Self::WriteFailed,
            TransportError::WriteTimedOut(_) => Self::WriteTimedOut,
            TransportError::ReadFailed(_) => Self::ReadFailed,
            TransportError::LivenessTimeout(_) => Self::LivenessTimeout,
            TransportError::PeerClosed => Self::PeerClosed,
        }
    }
}

/// Shared "connection closed" signal for one session.
///
/// Cloned into both halves. The first [`close`](Self::close) records the
/// reason; every later call is a no-op apart from returning `false`.
/// Cancelling the parent token closes the session with [`CloseReason::Shutdown`].
#[derive(Clone, Debug)]
pub struct SessionGuard {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    reason: OnceLock<CloseReason>,
}

impl SessionGuard {
    /// A standalone guard with no parent.
    pub fn new() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// A guard that also closes when `parent` is cancelled.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self::from_token(parent.child_token())
    }

    fn from_token(token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                token,
                reason: OnceLock::new(),
            }),
        }
    }

    /// Close the session. Returns `true` only for the call that recorded the reason.
    pub fn close(&self, reason: CloseReason) -> bool {
        // A cancelled token with no recorded reason means the parent fired first.
        let reason = if self.inner.token.is_cancelled() {
            CloseReason::Shutdown
        } else {
            reason
        };
        let first = self.inner.reason.set(reason).is_ok();
        self.inner.token.cancel();
        first
    }

    /// Whether the session has been closed, by either half or by shutdown.
    pub fn is_closed(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// The first recorded reason, or `Shutdown` if only the parent fired.
    pub fn reason(&self) -> Option<CloseReason> {
        self.inner
            .reason
            .get()
            .copied()
            .or_else(|| self.is_closed().then_some(CloseReason::Shutdown))
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.inner.token.cancelled().await;
    }
}

impl Default for SessionGuard {
    fn default() -> Self {
        Self::new()
    }
}
