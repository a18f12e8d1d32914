//! Bearer-token verification.
//!
//! Tokens are HMAC-signed JWTs carrying `{user, role}` and an optional `exp`.
//! Issuance happens elsewhere; this service only verifies.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use herald_core::{Identity, Role};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;
use crate::server::AppState;

/// JWT claims issued to senders and couriers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaims {
    /// Caller identity.
    #[serde(default)]
    pub user: String,
    /// `sender` or `courier`.
    #[serde(default)]
    pub role: String,
    /// Expiry, seconds since the epoch. Checked only when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// A verified caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    /// Who is calling.
    pub identity: Identity,
    /// What they may do.
    pub role: Role,
}

impl Caller {
    /// Refuse unless the caller holds `required`.
    pub fn require(&self, required: Role, action: &'static str) -> Result<(), ApiError> {
        if self.role == required {
            Ok(())
        } else {
            Err(ApiError::Forbidden {
                actual: self.role,
                action,
            })
        }
    }
}

/// Verifies `Authorization: Bearer <jwt>` headers against a shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Accept HS256, HS384 and HS512 tokens signed with `secret`.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify an `Authorization` header value.
    pub fn verify(&self, header: Option<&str>) -> Result<Caller, ApiError> {
        let token = header
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

        let claims = jsonwebtoken::decode::<UserClaims>(token, &self.key, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "token rejected");
                ApiError::Unauthorized("invalid token".into())
            })?
            .claims;

        let identity = Identity::new(claims.user)
            .map_err(|_| ApiError::Unauthorized("token carries no user".into()))?;
        Ok(Caller {
            identity,
            role: Role::parse(&claims.role),
        })
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

/// Extractor that verifies the bearer token before the handler runs.
#[derive(Clone, Debug)]
pub struct Authenticated(pub Caller);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        state.verifier.verify(header).map(Self)
    }
}
