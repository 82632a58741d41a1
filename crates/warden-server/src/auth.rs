//! Bearer-token authentication and role authorization.
//!
//! Protected routes run two middlewares in order, `authenticate` then
//! `authorize`. The first failure short-circuits with 401 or 403.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;

/// Token verification settings.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// HS256 shared secret.
    pub jwt_secret: String,
    /// Expected `iss` claim.
    pub issuer: Option<String>,
    /// Expected `aud` claim.
    pub audience: Option<String>,
    /// Role that must appear in `roles` or `permissions`.
    pub required_role: Option<String>,
}

/// Claims read from an accepted token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject, used as the audit client.
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiry (unix seconds).
    pub exp: u64,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Claims {
    /// Whether the role is granted through either claim.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().chain(self.permissions.iter()).any(|r| r == role)
    }
}

/// Verifies bearer tokens.
pub struct Authenticator {
    key: DecodingKey,
    validation: Validation,
    required_role: Option<String>,
}

impl Authenticator {
    /// Builds an authenticator from config.
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match config.audience {
            Some(ref audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            required_role: config.required_role.clone(),
        }
    }

    /// Verifies a raw token.
    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| ApiError::Unauthorized(e.to_string()))
    }

    /// Checks the configured role against verified claims.
    pub fn authorize(&self, claims: &Claims) -> Result<(), ApiError> {
        match self.required_role {
            Some(ref role) if !claims.has_role(role) => {
                Err(ApiError::Forbidden(format!("missing role {role}")))
            }
            _ => Ok(()),
        }
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// First stage: verify the bearer token and attach its claims.
pub async fn authenticate(
    State(auth): State<Arc<Authenticator>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    let claims = auth.verify(token).inspect_err(|e| {
        debug!(error = ?e, "Rejected bearer token");
    })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Second stage: require the configured role.
pub async fn authorize(
    State(auth): State<Arc<Authenticator>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| ApiError::Unauthorized("no verified claims".to_string()))?;

    auth.authorize(claims)?;
    Ok(next.run(request).await)
}
