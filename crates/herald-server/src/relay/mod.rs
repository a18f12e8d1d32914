//! Relay core: one session per upgraded connection.
//!
//! A session subscribes to the caller's channel, then runs two halves until
//! either fails or the subscription ends:
//!
//! - [`RelayLoop`] owns the write half. It forwards broker messages as Text
//!   frames and sends Ping heartbeats, every write bounded by `write_wait`.
//! - [`run_keepalive`] owns the read half. It enforces the `pong_wait` read
//!   deadline and discards everything but Pong and Close.
//!
//! The halves coordinate only through a [`SessionGuard`].

mod forward;
mod guard;
mod keepalive;
mod session;

use std::time::Duration;

use herald_settings::RelaySettings;

pub use forward::{RelayLoop, RelayOutcome, RelayState};
pub use guard::{CloseReason, SessionGuard};
pub use keepalive::run_keepalive;
pub use session::run_session;

/// Per-session deadlines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayTiming {
    /// Bound on every outbound frame, including the final Close.
    pub write_wait: Duration,
    /// Read deadline, extended only by Pong frames.
    pub pong_wait: Duration,
    /// Heartbeat period; shorter than `pong_wait`.
    pub ping_period: Duration,
}

impl Default for RelayTiming {
    fn default() -> Self {
        Self::from(&RelaySettings::default())
    }
}

impl From<&RelaySettings> for RelayTiming {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            write_wait: settings.write_wait(),
            pong_wait: settings.pong_wait(),
            ping_period: settings.ping_period(),
        }
    }
}
