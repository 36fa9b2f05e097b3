//! Vote site handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::Json;
use serde::{Deserialize, Serialize};

use realmshop_core::{
    NewVoteSite, Page, PageRequest, SiteId, VoteClaim, VoteLog, VoteLogFilter, VoteSite,
    VoteSiteUpdate,
};

use crate::auth::{AdminUser, AuthUser};
use crate::error::ApiError;
use crate::rewards;
use crate::state::AppState;

/// Largest vote log page.
const MAX_LOG_PAGE_SIZE: u32 = 200;

/// List enabled vote sites.
pub async fn list_sites(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<VoteSite>>, ApiError> {
    Ok(Json(state.store.list_vote_sites(false).await?))
}

/// Create a vote site (admin).
pub async fn create_site(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(req): Json<NewVoteSite>,
) -> Result<(StatusCode, Json<VoteSite>), ApiError> {
    req.validate()?;
    let site = state.store.create_vote_site(&req).await?;
    tracing::info!(site_id = %site.id, name = %site.name, admin = %admin.username, "Vote site created");
    Ok((StatusCode::CREATED, Json(site)))
}

/// Update a vote site (admin).
pub async fn update_site(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(site_id): Path<SiteId>,
    Json(req): Json<VoteSiteUpdate>,
) -> Result<Json<VoteSite>, ApiError> {
    req.validate()?;
    let site = state.store.update_vote_site(site_id, &req).await?;
    tracing::info!(site_id = %site_id, enabled = site.enabled, admin = %admin.username, "Vote site updated");
    Ok(Json(site))
}

/// Delete a vote site and its logs (admin).
pub async fn delete_site(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(site_id): Path<SiteId>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_vote_site(site_id).await?;
    tracing::info!(site_id = %site_id, admin = %admin.username, "Vote site deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Claim response.
#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    /// Always true.
    pub ok: bool,
    /// The claimed site.
    pub site_id: SiteId,
    /// Reward details.
    #[serde(flatten)]
    pub claim: VoteClaim,
}

/// Claim a vote reward.
pub async fn claim(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(site_id): Path<SiteId>,
) -> Result<Json<ClaimResponse>, ApiError> {
    let claim = rewards::claim(state.store.as_ref(), &user.username, site_id).await?;
    Ok(Json(ClaimResponse {
        ok: true,
        site_id,
        claim,
    }))
}

/// Claim, then send the voter to the site even while cooling down.
pub async fn redirect(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(site_id): Path<SiteId>,
) -> Result<Redirect, ApiError> {
    let url = rewards::redirect_target(state.store.as_ref(), &user.username, site_id).await?;
    Ok(Redirect::temporary(&url))
}

/// Vote log query.
#[derive(Debug, Default, Deserialize)]
pub struct VoteLogQuery {
    /// One-based page.
    #[serde(default)]
    pub page: Option<u32>,
    /// Rows per page.
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Only this site.
    #[serde(default)]
    pub site_id: Option<SiteId>,
}

/// The caller's vote history, newest first.
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<VoteLogQuery>,
) -> Result<Json<Page<VoteLog>>, ApiError> {
    let filter = VoteLogFilter {
        username: Some(user.username),
        site_id: query.site_id,
    };
    let page = PageRequest::clamped(query.page, query.page_size, MAX_LOG_PAGE_SIZE);
    Ok(Json(state.store.list_vote_logs(&filter, page).await?))
}
