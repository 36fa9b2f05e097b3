//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use realmshop_core::ShopError;
use realmshop_store::StoreError;

use crate::bold::BoldError;
use crate::paypal::PayPalError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Rejected by ledger validation; nothing changed.
    #[error(transparent)]
    Rejected(#[from] ShopError),

    /// A gateway integration is not configured.
    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    /// Storage is temporarily unavailable; the call may be retried.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

impl ApiError {
    /// Whether the caller may retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::ExternalService(_))
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

fn rejection_parts(err: &ShopError) -> (StatusCode, &'static str, Option<serde_json::Value>) {
    match err {
        ShopError::InsufficientFunds {
            credits_balance,
            credits_required,
            vote_points_balance,
            vote_points_required,
        } => (
            StatusCode::PAYMENT_REQUIRED,
            "insufficient_funds",
            Some(serde_json::json!({
                "credits_balance": credits_balance,
                "credits_required": credits_required,
                "vote_points_balance": vote_points_balance,
                "vote_points_required": vote_points_required,
            })),
        ),
        ShopError::CooldownActive {
            site_id,
            next_available_at,
        } => (
            StatusCode::TOO_MANY_REQUESTS,
            "cooldown_active",
            Some(serde_json::json!({
                "site_id": site_id,
                "next_available_at": next_available_at,
            })),
        ),
        ShopError::LimitReached {
            item_id,
            limit,
            bought,
        } => (
            StatusCode::BAD_REQUEST,
            "limit_reached",
            Some(serde_json::json!({
                "item_id": item_id,
                "limit": limit,
                "bought": bought,
            })),
        ),
        ShopError::MixedRealms(realms) => (
            StatusCode::BAD_REQUEST,
            "mixed_realms",
            Some(serde_json::json!({ "realms": realms })),
        ),
        ShopError::SiteDisabled(_) => (StatusCode::NOT_FOUND, "site_unavailable", None),
        ShopError::EmptyOrder => (StatusCode::BAD_REQUEST, "empty_order", None),
        ShopError::InvalidQuantity { .. } => (StatusCode::BAD_REQUEST, "invalid_quantity", None),
        ShopError::ItemUnavailable(_) => (StatusCode::BAD_REQUEST, "item_unavailable", None),
        ShopError::RealmMismatch { .. } => (StatusCode::BAD_REQUEST, "realm_mismatch", None),
        ShopError::SiteMisconfigured(_) => (StatusCode::BAD_REQUEST, "site_misconfigured", None),
        ShopError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "invalid_amount", None),
        ShopError::CurrencyNotAllowed(_) => {
            (StatusCode::BAD_REQUEST, "currency_not_allowed", None)
        }
        ShopError::InvalidStatus(_) => (StatusCode::BAD_REQUEST, "invalid_status", None),
        ShopError::InvalidInput(_) | ShopError::InvalidId(_) => {
            (StatusCode::BAD_REQUEST, "bad_request", None)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::Rejected(err) => {
                let (status, code, details) = rejection_parts(err);
                (status, code, err.to_string(), details)
            }
            Self::NotConfigured(what) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "not_configured",
                format!("{what} is not configured"),
                None,
            ),
            Self::Unavailable(msg) => {
                tracing::warn!(error = %msg, "Storage unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "Service temporarily unavailable".to_string(),
                    Some(serde_json::json!({ "retryable": true })),
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::Rejected(err) => Self::Rejected(err),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Database(msg) => Self::Unavailable(msg),
            StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<PayPalError> for ApiError {
    fn from(err: PayPalError) -> Self {
        match err {
            PayPalError::Configuration(_) => Self::NotConfigured("PayPal"),
            other => {
                tracing::warn!(error = %other, "PayPal request failed");
                Self::ExternalService(other.to_string())
            }
        }
    }
}

impl From<BoldError> for ApiError {
    fn from(err: BoldError) -> Self {
        match err {
            BoldError::Configuration(_) => Self::NotConfigured("Bold"),
            BoldError::InvalidSignature => Self::BadRequest("Invalid webhook signature".into()),
            other => {
                tracing::warn!(error = %other, "Bold request failed");
                Self::ExternalService(other.to_string())
            }
        }
    }
}
