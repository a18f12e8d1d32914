//! # herald-server
//!
//! HTTP + `WebSocket` surface of the Herald notification relay.
//!
//! - `POST /notifications`: couriers publish `{user, message}` to the broker
//! - `GET /notifications/ws`: senders open a relay session for their identity
//! - `GET /health`, `GET /metrics`
//! - [`relay`]: the per-connection session core (subscription, relay loop, keepalive monitor)
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;

pub use server::{AppState, HeraldServer};
