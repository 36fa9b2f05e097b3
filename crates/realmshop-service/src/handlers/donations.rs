//! Donation handlers: PayPal orders and captures, Bold checkout, listings.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use realmshop_core::{
    normalize_currency, parse_amount, DonationFilter, DonationPayment, Gateway, NewDonation, Page,
    PageRequest, PaymentStatus, ShopError,
};

use crate::auth::{AdminUser, AuthUser};
use crate::bold::generate_order_id;
use crate::error::ApiError;
use crate::handlers::PageQuery;
use crate::reconcile::reconcile_payment;
use crate::state::AppState;

/// Largest page for an account's own donations.
const MAX_OWN_PAGE_SIZE: u32 = 200;

/// Largest page for the admin listing.
const MAX_ADMIN_PAGE_SIZE: u32 = 500;

/// A decimal amount given as a JSON string or number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    /// `"10.00"`.
    Text(String),
    /// `10` or `10.5`.
    Number(serde_json::Number),
}

impl AmountInput {
    /// The amount in minor units.
    pub fn cents(&self) -> Result<i64, ShopError> {
        match self {
            Self::Text(text) => parse_amount(text),
            Self::Number(n) => parse_amount(&n.to_string()),
        }
    }
}

/// A stored donation as returned to clients.
#[derive(Debug, Serialize)]
pub struct DonationView {
    /// The payment record.
    #[serde(flatten)]
    pub payment: DonationPayment,
    /// Amount as a two-decimal string.
    pub amount: String,
}

impl From<DonationPayment> for DonationView {
    fn from(payment: DonationPayment) -> Self {
        Self {
            amount: payment.amount(),
            payment,
        }
    }
}

// ============================================================================
// PayPal
// ============================================================================

/// Create-order request.
#[derive(Debug, Deserialize)]
pub struct PayPalOrderRequest {
    /// Donation amount.
    pub amount: AmountInput,
    /// ISO currency (default USD).
    #[serde(default = "default_paypal_currency")]
    pub currency: String,
}

fn default_paypal_currency() -> String {
    "USD".into()
}

/// Create-order response.
#[derive(Debug, Serialize)]
pub struct PayPalOrderResponse {
    /// Always true.
    pub ok: bool,
    /// PayPal order id.
    pub order_id: String,
    /// Where the buyer approves the payment.
    pub approve_link: Option<String>,
    /// Stored status.
    pub status: PaymentStatus,
}

/// Open a PayPal order and record it.
pub async fn create_paypal_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<PayPalOrderRequest>,
) -> Result<Json<PayPalOrderResponse>, ApiError> {
    let paypal = state.paypal()?;
    let amount_cents = req.amount.cents()?;
    let currency = normalize_currency(&req.currency, &state.config.paypal.allowed_currencies)?;

    let order = paypal.create_order(amount_cents, &currency, &user.username).await?;

    let donation = NewDonation {
        username: user.username.clone(),
        gateway: Gateway::PayPal,
        external_id: order.id.clone(),
        status: order.payment_status().unwrap_or(PaymentStatus::Created),
        amount_cents,
        currency,
        credits_rate: state.config.paypal.credits_rate,
    };
    donation.validate()?;
    let payment = state.store.create_donation(&donation).await?;

    tracing::info!(
        username = %user.username,
        order_id = %order.id,
        amount = %payment.amount(),
        currency = %payment.currency,
        "PayPal order created"
    );

    Ok(Json(PayPalOrderResponse {
        ok: true,
        approve_link: order.approve_link().map(str::to_string),
        order_id: order.id,
        status: payment.status,
    }))
}

/// Capture request.
#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    /// PayPal order id.
    pub order_id: String,
}

/// Capture response.
#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    /// The payment after reconciliation.
    #[serde(flatten)]
    pub donation: DonationView,
    /// Credits granted by this call.
    pub granted_now: i64,
}

/// Capture an approved PayPal order owned by the caller.
pub async fn capture_paypal_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CaptureRequest>,
) -> Result<Json<CaptureResponse>, ApiError> {
    let not_found = || ApiError::NotFound(format!("order not found: {}", req.order_id));

    let stored = state
        .store
        .get_donation(Gateway::PayPal, &req.order_id)
        .await?
        .ok_or_else(not_found)?;
    if stored.username != user.username {
        return Err(not_found());
    }
    if stored.status == PaymentStatus::Completed {
        return Ok(Json(CaptureResponse {
            donation: stored.into(),
            granted_now: 0,
        }));
    }

    let order = state.paypal()?.capture_or_query(&req.order_id).await?;
    let status = order.payment_status().ok_or_else(|| {
        ApiError::ExternalService(format!("unexpected PayPal order status: {}", order.status))
    })?;

    let outcome = reconcile_payment(state.store.as_ref(), Gateway::PayPal, &req.order_id, status).await?;
    Ok(Json(CaptureResponse {
        donation: outcome.payment.into(),
        granted_now: outcome.granted_now,
    }))
}

// ============================================================================
// Bold
// ============================================================================

/// Standalone hash request.
#[derive(Debug, Deserialize)]
pub struct BoldHashRequest {
    /// Order id.
    pub order_id: String,
    /// Whole currency units.
    pub amount: i64,
    /// ISO currency.
    pub currency: String,
}

/// Standalone hash response.
#[derive(Debug, Serialize)]
pub struct BoldHashResponse {
    /// Always true.
    pub ok: bool,
    /// Hex SHA-256 integrity signature.
    pub integrity_signature: String,
}

/// Compute a Bold integrity signature.
pub async fn bold_hash(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(req): Json<BoldHashRequest>,
) -> Result<Json<BoldHashResponse>, ApiError> {
    let bold = state.bold()?;
    let currency = normalize_currency(&req.currency, &state.config.bold.allowed_currencies)?;
    Ok(Json(BoldHashResponse {
        ok: true,
        integrity_signature: bold.integrity_signature(&req.order_id, req.amount, &currency),
    }))
}

/// Bold checkout request.
#[derive(Debug, Deserialize)]
pub struct BoldCreateRequest {
    /// Whole currency units.
    pub amount: i64,
    /// ISO currency (default COP).
    #[serde(default = "default_bold_currency")]
    pub currency: String,
    /// Shown on the checkout.
    #[serde(default)]
    pub description: Option<String>,
    /// Tax code such as `vat-19`.
    #[serde(default)]
    pub tax: Option<String>,
    /// Where Bold sends the buyer afterwards.
    #[serde(default)]
    pub redirection_url: Option<String>,
}

fn default_bold_currency() -> String {
    "COP".into()
}

/// Everything the checkout button needs.
#[derive(Debug, Serialize)]
pub struct BoldCreateResponse {
    /// Always true.
    pub ok: bool,
    /// Generated order id.
    pub order_id: String,
    /// Whole currency units.
    pub amount: i64,
    /// ISO currency.
    pub currency: String,
    /// Hex SHA-256 integrity signature.
    pub integrity_signature: String,
    /// Public API key.
    pub api_key: String,
    /// Post-checkout redirect.
    pub redirection_url: String,
    /// Shown on the checkout.
    pub description: Option<String>,
    /// Tax code.
    pub tax: Option<String>,
}

/// Open a Bold checkout and record it.
pub async fn bold_create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<BoldCreateRequest>,
) -> Result<Json<BoldCreateResponse>, ApiError> {
    let bold = state.bold()?;
    if req.amount <= 0 {
        return Err(ShopError::InvalidAmount(req.amount.to_string()).into());
    }
    let amount_cents = req
        .amount
        .checked_mul(100)
        .ok_or_else(|| ShopError::InvalidAmount(req.amount.to_string()))?;
    let currency = normalize_currency(&req.currency, &state.config.bold.allowed_currencies)?;

    let order_id = generate_order_id(&user.username, Utc::now());
    let integrity_signature = bold.integrity_signature(&order_id, req.amount, &currency);

    let donation = NewDonation {
        username: user.username.clone(),
        gateway: Gateway::Bold,
        external_id: order_id.clone(),
        status: PaymentStatus::Created,
        amount_cents,
        currency: currency.clone(),
        credits_rate: state.config.bold.credits_rate,
    };
    donation.validate()?;
    state.store.create_donation(&donation).await?;

    tracing::info!(username = %user.username, order_id = %order_id, amount = req.amount, currency = %currency, "Bold order created");

    Ok(Json(BoldCreateResponse {
        ok: true,
        order_id,
        amount: req.amount,
        currency,
        integrity_signature,
        api_key: bold.api_key().to_string(),
        redirection_url: req
            .redirection_url
            .or_else(|| state.config.bold.default_redirect_url.clone())
            .unwrap_or_default(),
        description: req.description,
        tax: req.tax,
    }))
}

/// Ask Bold for the status of one of the caller's orders and reconcile it.
///
/// Covers buyers whose webhook never arrived.
pub async fn bold_sync(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_id): Path<String>,
) -> Result<Json<CaptureResponse>, ApiError> {
    let not_found = || ApiError::NotFound(format!("order not found: {order_id}"));

    let stored = state
        .store
        .get_donation(Gateway::Bold, &order_id)
        .await?
        .ok_or_else(not_found)?;
    if stored.username != user.username {
        return Err(not_found());
    }
    if stored.status == PaymentStatus::Completed {
        return Ok(Json(CaptureResponse {
            donation: stored.into(),
            granted_now: 0,
        }));
    }

    let status = state.bold()?.query_status(&order_id).await?;
    let outcome = reconcile_payment(state.store.as_ref(), Gateway::Bold, &order_id, status).await?;
    Ok(Json(CaptureResponse {
        donation: outcome.payment.into(),
        granted_now: outcome.granted_now,
    }))
}

// ============================================================================
// Listings
// ============================================================================

/// The caller's donations.
pub async fn list_my_donations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<DonationView>>, ApiError> {
    let filter = DonationFilter {
        username: Some(user.username),
        ..DonationFilter::default()
    };
    let page = PageRequest::clamped(query.page, query.page_size, MAX_OWN_PAGE_SIZE);
    Ok(Json(into_views(state.store.list_donations(&filter, page).await?)))
}

/// Admin donation query.
#[derive(Debug, Default, Deserialize)]
pub struct AdminDonationsQuery {
    /// One-based page.
    #[serde(default)]
    pub page: Option<u32>,
    /// Rows per page.
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Only this status.
    #[serde(default)]
    pub status: Option<String>,
    /// Only this gateway.
    #[serde(default)]
    pub gateway: Option<String>,
}

/// All donations (admin).
pub async fn list_all_donations(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<AdminDonationsQuery>,
) -> Result<Json<Page<DonationView>>, ApiError> {
    let filter = DonationFilter {
        username: None,
        status: query.status.as_deref().map(str::parse).transpose()?,
        gateway: query.gateway.as_deref().map(str::parse).transpose()?,
    };
    let page = PageRequest::clamped(query.page, query.page_size, MAX_ADMIN_PAGE_SIZE);
    Ok(Json(into_views(state.store.list_donations(&filter, page).await?)))
}

fn into_views(page: Page<DonationPayment>) -> Page<DonationView> {
    page.map(DonationView::from)
}
