//! Identities, broker channels and notifications.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Prefix shared by every per-user broker channel.
pub const CHANNEL_PREFIX: &str = "notifications:";

/// Authenticated caller name. Always non-empty.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap a user name, rejecting the empty string.
    pub fn new(user: impl Into<String>) -> Result<Self, ValidationError> {
        let user = user.into();
        if user.is_empty() {
            return Err(ValidationError::EmptyUser);
        }
        Ok(Self(user))
    }

    /// Borrow the user name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The broker channel this identity listens on.
    pub fn channel(&self) -> Channel {
        Channel::for_identity(self)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a token holder is allowed to do.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May open a relay connection and receive notifications.
    Sender,
    /// May publish notifications.
    Courier,
    /// Any role this service does not know about.
    Unknown,
}

impl Role {
    /// Parse a role claim. Unrecognized names map to [`Role::Unknown`].
    pub fn parse(name: &str) -> Self {
        match name {
            "sender" => Self::Sender,
            "courier" => Self::Courier,
            _ => Self::Unknown,
        }
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Courier => "courier",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker channel name, `"notifications:" + user`. Case-sensitive, exact match.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Channel(String);

impl Channel {
    /// Derive the channel for an identity.
    pub fn for_identity(identity: &Identity) -> Self {
        Self(format!("{CHANNEL_PREFIX}{}", identity.as_str()))
    }

    /// Borrow the full channel name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw ingress body for `POST /notifications`. Unknown fields are rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationRequest {
    /// Target user.
    #[serde(default)]
    pub user: String,
    /// Message text delivered verbatim.
    #[serde(default)]
    pub message: String,
}

/// A validated notification. Fields are immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    user: Identity,
    message: String,
}

impl Notification {
    /// Build a notification, checking the user first and then the message.
    pub fn new(user: impl Into<String>, message: impl Into<String>) -> Result<Self, ValidationError> {
        let user = Identity::new(user)?;
        let message = message.into();
        if message.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        Ok(Self { user, message })
    }

    /// Target identity.
    pub fn user(&self) -> &Identity {
        &self.user
    }

    /// Message text.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Channel this notification is published on.
    pub fn channel(&self) -> Channel {
        self.user.channel()
    }
}

impl TryFrom<NotificationRequest> for Notification {
    type Error = ValidationError;

    fn try_from(req: NotificationRequest) -> Result<Self, Self::Error> {
        Self::new(req.user, req.message)
    }
}
