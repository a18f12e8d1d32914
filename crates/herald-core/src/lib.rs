//! # herald-core
//!
//! Shared vocabulary for the Herald notification relay.
//!
//! - [`Identity`] and [`Role`]: who is calling, resolved from a bearer token
//! - [`Channel`]: the broker channel derived from an identity
//! - [`Notification`]: a validated `{user, message}` pair ready to publish
//! - [`errors`]: the validation / broker / transport error taxonomy

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod notification;

pub use errors::{BrokerError, TransportError, ValidationError};
pub use ids::SessionId;
pub use notification::{Channel, CHANNEL_PREFIX, Identity, Notification, NotificationRequest, Role};
