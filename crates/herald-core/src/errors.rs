//! Error types shared across Herald crates.
//!
//! - [`ValidationError`]: a submitted notification was rejected at ingress
//! - [`BrokerError`]: connect, subscribe or publish failed on the broker
//! - [`TransportError`]: a relay connection failed and the session must end

use std::time::Duration;

/// A submitted notification failed field validation.
/// Rejected at ingress; never reaches the broker and is never retried.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The `user` field was empty.
    #[error("incorrect user")]
    EmptyUser,
    /// The `message` field was empty.
    #[error("incorrect message")]
    EmptyMessage,
}

/// The broker refused or could not complete an operation.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BrokerError {
    /// Could not reach or authenticate with the broker.
    #[error("broker connection failed: {0}")]
    Connect(String),
    /// Opening a subscription failed.
    #[error("subscribe to {channel} failed: {message}")]
    Subscribe {
        /// Channel being subscribed.
        channel: String,
        /// Broker error text.
        message: String,
    },
    /// A publish was not accepted.
    #[error("publish to {channel} failed: {message}")]
    Publish {
        /// Channel being published to.
        channel: String,
        /// Broker error text.
        message: String,
    },
}

impl BrokerError {
    /// Short operation label for logging/metrics.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Subscribe { .. } => "subscribe",
            Self::Publish { .. } => "publish",
        }
    }
}

/// A failure on the relay connection. Always fatal to the session.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The socket rejected an outbound frame.
    #[error("write failed: {0}")]
    WriteFailed(String),
    /// An outbound frame was not accepted within the write deadline.
    #[error("write timed out after {0:?}")]
    WriteTimedOut(Duration),
    /// The socket failed while reading.
    #[error("read failed: {0}")]
    ReadFailed(String),
    /// No pong arrived within the read deadline.
    #[error("no liveness acknowledgment within {0:?}")]
    LivenessTimeout(Duration),
    /// The client sent Close or the stream ended.
    #[error("peer closed the connection")]
    PeerClosed,
}
