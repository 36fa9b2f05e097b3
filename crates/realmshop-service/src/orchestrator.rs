//! Purchase orchestration.
//!
//! Validates an order against a catalog snapshot, resolves the in-game recipient
//! and hands the debit to the store, which re-checks funds and limits under the
//! buyer's row lock. Delivery is queued in the same transaction; the worker is
//! woken once the commit returns.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use realmshop_core::{
    validate_order, DeliveryStatus, ItemId, OrderLine, Purchase, PurchaseId, RealmId, Recipient,
    RecipientRequest, Username,
};
use realmshop_store::{PurchaseReceipt, Store, DELIVERY_LEASE_SECONDS};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// A purchase as submitted by the buyer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PurchaseRequest {
    /// Order lines.
    #[serde(default)]
    pub items: Vec<OrderLine>,
    /// Single-item form, used when `items` is empty.
    #[serde(default)]
    pub item_id: Option<ItemId>,
    /// Quantity for the single-item form.
    #[serde(default)]
    pub quantity: Option<i64>,
    /// Realm the order is delivered to.
    #[serde(default)]
    pub realm_id: Option<RealmId>,
    /// Character that receives the goods.
    #[serde(flatten)]
    pub recipient: RecipientRequest,
}

impl PurchaseRequest {
    /// The order lines, folding in the single-item form.
    #[must_use]
    pub fn lines(&self) -> Vec<OrderLine> {
        if !self.items.is_empty() {
            return self.items.clone();
        }
        self.item_id
            .map(|item_id| OrderLine {
                item_id,
                quantity: self.quantity.unwrap_or(1),
            })
            .into_iter()
            .collect()
    }
}

/// Result of a resend request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResendOutcome {
    /// The purchase was already delivered and `force` was not set.
    AlreadySent {
        /// Always true.
        already_sent: bool,
    },
    /// Another attempt is dispatching the purchase right now.
    InProgress {
        /// Always true.
        in_progress: bool,
    },
    /// A delivery job was queued.
    Queued {
        /// Always true.
        queued: bool,
        /// Whether a sent purchase is being re-dispatched.
        forced: bool,
    },
}

/// Validate and execute a purchase for `username`.
pub async fn place_order(
    state: &AppState,
    username: &Username,
    request: &PurchaseRequest,
) -> Result<PurchaseReceipt, ApiError> {
    let lines = request.lines();
    let mut ids: Vec<ItemId> = lines.iter().map(|l| l.item_id).collect();
    ids.sort_unstable();
    ids.dedup();

    let catalog = state.store.get_items(&ids).await?;
    let order = validate_order(&lines, &catalog, request.realm_id)?;

    // Early rejection only; the store re-checks under the lock.
    let limited = order.limited_items();
    if !limited.is_empty() {
        let bought = state.store.bought_units(username, &limited).await?;
        order.check_limits(|item| bought.get(&item).copied().unwrap_or(0))?;
    }

    let recipient = resolve_recipient(state.store.as_ref(), username, order.realm_id, &request.recipient).await?;

    let receipt = state
        .store
        .execute_purchase(realmshop_core::NewPurchase {
            username: username.clone(),
            order,
            recipient,
        })
        .await?;

    tracing::info!(
        username = %username,
        purchase_id = %receipt.purchase.id,
        credits = receipt.purchase.total.credits,
        vote_points = receipt.purchase.total.vote_points,
        lines = receipt.purchase.lines.len(),
        "Purchase committed"
    );
    state.delivery.notify();

    Ok(receipt)
}

/// Re-queue delivery of a purchase, optionally setting its recipient first.
pub async fn resend(
    state: &AppState,
    user: &AuthUser,
    purchase_id: PurchaseId,
    force: bool,
    recipient: &RecipientRequest,
) -> Result<ResendOutcome, ApiError> {
    let mut purchase = load_visible(state.store.as_ref(), user, purchase_id).await?;

    if !recipient.is_empty() {
        let resolved =
            resolve_recipient(state.store.as_ref(), &purchase.username, purchase.realm_id, recipient)
                .await?
                .ok_or_else(|| ApiError::BadRequest("character not found".into()))?;
        purchase = state.store.set_recipient(purchase_id, &resolved).await?;
    }

    let stale = purchase.updated_at < Utc::now() - Duration::seconds(DELIVERY_LEASE_SECONDS);
    if !purchase.delivery_status.may_dispatch(force, stale) {
        return Ok(match purchase.delivery_status {
            DeliveryStatus::Sent => ResendOutcome::AlreadySent { already_sent: true },
            _ => ResendOutcome::InProgress { in_progress: true },
        });
    }

    let job_id = state.store.enqueue_delivery(purchase_id, force).await?;
    tracing::info!(
        purchase_id = %purchase_id,
        job_id = %job_id,
        forced = force,
        requested_by = %user.username,
        "Delivery re-queued"
    );
    state.delivery.notify();

    Ok(ResendOutcome::Queued {
        queued: true,
        forced: force,
    })
}

/// Load a purchase the user owns, or any purchase for an admin.
pub async fn load_visible(
    store: &dyn Store,
    user: &AuthUser,
    purchase_id: PurchaseId,
) -> Result<Purchase, ApiError> {
    let purchase = store
        .get_purchase(purchase_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("purchase not found: {purchase_id}")))?;
    if !user.can_access(&purchase.username) {
        return Err(ApiError::Forbidden);
    }
    Ok(purchase)
}

/// Resolve a requested character against the account's own characters.
///
/// Returns `None` when no character was requested. A requested character that
/// the account does not own, or that lives on another realm, is rejected.
pub async fn resolve_recipient(
    store: &dyn Store,
    username: &Username,
    realm_id: Option<RealmId>,
    request: &RecipientRequest,
) -> Result<Option<Recipient>, ApiError> {
    if request.is_empty() {
        return Ok(None);
    }

    let characters = store.list_characters(username).await?;
    let character = characters
        .into_iter()
        .filter(|c| match (c.realm_id, realm_id) {
            (Some(own), Some(wanted)) => own == wanted,
            _ => true,
        })
        .find(|c| request.matches(c))
        .ok_or_else(|| ApiError::BadRequest("character not found on this account".into()))?;

    Ok(Some(character.into()))
}
