//! Balance handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use realmshop_core::{AccountBalance, BalanceDelta, Username};

use crate::auth::{AdminUser, AuthUser};
use crate::error::ApiError;
use crate::state::AppState;

/// Get the caller's balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<AccountBalance>, ApiError> {
    Ok(Json(state.store.get_balance(&user.username).await?))
}

/// Manual balance adjustment.
#[derive(Debug, Deserialize)]
pub struct AdjustBalanceRequest {
    /// Target account.
    pub username: Username,
    /// Signed credits delta.
    #[serde(default)]
    pub credits: i64,
    /// Signed vote points delta.
    #[serde(default)]
    pub vote_points: i64,
    /// Free-text reason, logged only.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Adjust an account's balance (admin). Debits that would go negative are rejected.
pub async fn adjust_balance(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(req): Json<AdjustBalanceRequest>,
) -> Result<Json<AccountBalance>, ApiError> {
    if req.credits == 0 && req.vote_points == 0 {
        return Err(ApiError::BadRequest("nothing to adjust".into()));
    }

    let delta = BalanceDelta {
        credits: req.credits,
        vote_points: req.vote_points,
    };
    let balance = state.store.apply_delta(&req.username, delta).await?;

    tracing::info!(
        username = %req.username,
        credits = req.credits,
        vote_points = req.vote_points,
        reason = req.reason.as_deref().unwrap_or(""),
        admin = %admin.username,
        "Balance adjusted"
    );

    Ok(Json(balance))
}
