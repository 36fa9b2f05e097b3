//! Authentication extractors.
//!
//! Sessions are issued by the external auth collaborator as signed JWTs carrying
//! the account username and a numeric role. This module only validates them:
//!
//! - `AuthUser` - any logged-in account
//! - `AdminUser` - an account whose role reaches `ADMIN_ROLE_LEVEL`

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use realmshop_core::Username;

use crate::error::ApiError;
use crate::state::AppState;

/// Role assigned when a token carries none.
pub const DEFAULT_ROLE: i32 = 1;

/// Session claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (account id or username).
    pub sub: String,
    /// Account username; falls back to `sub`.
    #[serde(default)]
    pub username: Option<String>,
    /// Numeric role.
    #[serde(default)]
    pub role: Option<i32>,
    /// Expiration time.
    pub exp: i64,
}

/// An authenticated account.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The account username.
    pub username: Username,
    /// The session role.
    pub role: i32,
    /// Whether the role reaches the admin level.
    pub is_admin: bool,
}

impl AuthUser {
    /// Whether this user may act on a record owned by `owner`.
    #[must_use]
    pub fn can_access(&self, owner: &Username) -> bool {
        self.is_admin || &self.username == owner
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let claims = validate_session(token, state)?;
        let username = claims
            .username
            .unwrap_or(claims.sub)
            .parse::<Username>()
            .map_err(|_| ApiError::Unauthorized)?;
        let role = claims.role.unwrap_or(DEFAULT_ROLE);

        Ok(AuthUser {
            username,
            role,
            is_admin: role >= state.config.admin_role_level,
        })
    }
}

/// An authenticated admin.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            tracing::warn!(username = %user.username, role = user.role, "Admin access denied");
            return Err(ApiError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

/// Validate a session token with the configured shared secret.
fn validate_session(token: &str, state: &AppState) -> Result<SessionClaims, ApiError> {
    let secret = state.config.jwt_secret.as_deref().ok_or_else(|| {
        tracing::warn!("JWT_SECRET not configured - rejecting session");
        ApiError::Unauthorized
    })?;

    let algorithm = Algorithm::from_str(&state.config.jwt_algorithm).map_err(|e| {
        tracing::error!(error = %e, algorithm = %state.config.jwt_algorithm, "Unsupported JWT algorithm");
        ApiError::Unauthorized
    })?;

    let validation = Validation::new(algorithm);
    decode::<SessionClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(error = %e, "JWT validation failed");
            ApiError::Unauthorized
        })
}
