//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use herald_core::{BrokerError, Role, ValidationError};
use serde_json::json;

/// Every way a request can be refused.
///
/// Rendered as `{"error": <code>, "message": <text>}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing, malformed or rejected bearer token.
    #[error("{0}")]
    Unauthorized(String),
    /// The token is valid but its role may not perform the action.
    #[error("role '{actual}' may not {action}")]
    Forbidden {
        /// Role carried by the token.
        actual: Role,
        /// What the caller attempted.
        action: &'static str,
    },
    /// WebSocket upgrade from an origin outside the allowed list.
    #[error("origin '{0}' is not allowed")]
    OriginNotAllowed(String),
    /// Body was not declared as JSON.
    #[error("expected content-type application/json")]
    UnsupportedMediaType,
    /// Body is not valid JSON or has unknown fields.
    #[error("malformed body: {0}")]
    MalformedBody(String),
    /// Body parsed but a field is empty.
    #[error(transparent)]
    InvalidNotification(#[from] ValidationError),
    /// The broker refused the publish.
    #[error("broker unavailable")]
    BrokerUnavailable(#[from] BrokerError),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } | Self::OriginNotAllowed(_) => StatusCode::FORBIDDEN,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::MalformedBody(_) | Self::InvalidNotification(_) => StatusCode::BAD_REQUEST,
            Self::BrokerUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden { .. } => "forbidden",
            Self::OriginNotAllowed(_) => "origin_not_allowed",
            Self::UnsupportedMediaType => "unsupported_media_type",
            Self::MalformedBody(_) => "malformed_body",
            Self::InvalidNotification(_) => "invalid_notification",
            Self::BrokerUnavailable(_) => "broker_unavailable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
