//! Purchase handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use realmshop_core::{
    AccountBalance, DeliveryStatus, Page, PageRequest, Purchase, PurchaseFilter, PurchaseId,
    RecipientRequest, Username,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::orchestrator::{self, PurchaseRequest, ResendOutcome};
use crate::state::AppState;

/// Largest purchase page.
const MAX_PURCHASE_PAGE_SIZE: u32 = 200;

/// Purchase response.
#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    /// Always true.
    pub ok: bool,
    /// The stored purchase.
    pub purchase: Purchase,
    /// Balance after the debit.
    pub balance: AccountBalance,
}

/// Buy one or more items.
pub async fn purchase(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let receipt = orchestrator::place_order(&state, &user.username, &req).await?;
    Ok(Json(PurchaseResponse {
        ok: true,
        purchase: receipt.purchase,
        balance: receipt.balance,
    }))
}

/// Purchase listing query.
#[derive(Debug, Default, Deserialize)]
pub struct ListPurchasesQuery {
    /// One-based page.
    #[serde(default)]
    pub page: Option<u32>,
    /// Rows per page.
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Another account's purchases (admin only).
    #[serde(default)]
    pub username: Option<Username>,
    /// Only purchases in this delivery state.
    #[serde(default)]
    pub delivery_status: Option<DeliveryStatus>,
}

/// List purchases: the caller's own, or any account's for an admin.
pub async fn list_purchases(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ListPurchasesQuery>,
) -> Result<Json<Page<Purchase>>, ApiError> {
    let username = match query.username {
        Some(other) if user.is_admin => Some(other),
        Some(other) if other != user.username => return Err(ApiError::Forbidden),
        _ if user.is_admin => None,
        _ => Some(user.username.clone()),
    };

    let filter = PurchaseFilter {
        username,
        delivery_status: query.delivery_status,
    };
    let page = PageRequest::clamped(query.page, query.page_size, MAX_PURCHASE_PAGE_SIZE);
    Ok(Json(state.store.list_purchases(&filter, page).await?))
}

/// Get one purchase.
pub async fn get_purchase(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(purchase_id): Path<PurchaseId>,
) -> Result<Json<Purchase>, ApiError> {
    let purchase = orchestrator::load_visible(state.store.as_ref(), &user, purchase_id).await?;
    Ok(Json(purchase))
}

/// Resend query.
#[derive(Debug, Default, Deserialize)]
pub struct ResendQuery {
    /// Re-dispatch even if already sent.
    #[serde(default)]
    pub force: bool,
}

/// Re-queue delivery; the body may name a recipient for a purchase that lacks one.
pub async fn resend(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(purchase_id): Path<PurchaseId>,
    Query(query): Query<ResendQuery>,
    body: Option<Json<RecipientRequest>>,
) -> Result<Json<ResendOutcome>, ApiError> {
    let recipient = body.map(|Json(r)| r).unwrap_or_default();
    let outcome = orchestrator::resend(&state, &user, purchase_id, query.force, &recipient).await?;
    Ok(Json(outcome))
}
