//! Webhook handlers for PayPal and Bold.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use realmshop_core::{Gateway, PaymentStatus};

use crate::bold::{normalize_status, BoldWebhook};
use crate::error::ApiError;
use crate::paypal::{Transmission, WebhookEvent};
use crate::reconcile::reconcile_payment;
use crate::state::AppState;

/// PayPal webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was received.
    pub received: bool,
    /// Set when the event named nothing we track.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
    /// Credits granted by this delivery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted: Option<i64>,
    /// Credits granted for the payment so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_granted: Option<i64>,
}

impl WebhookResponse {
    const fn ignored() -> Self {
        Self {
            received: true,
            ignored: true,
            granted: None,
            credits_granted: None,
        }
    }
}

/// Handle PayPal webhooks.
pub async fn paypal_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let raw: serde_json::Value =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    match state.paypal.as_deref().filter(|p| p.webhook_id().is_some()) {
        Some(paypal) => {
            let transmission = Transmission::from_headers(&headers)
                .ok_or_else(|| ApiError::BadRequest("Missing PayPal transmission headers".into()))?;
            if !paypal.verify_webhook(&transmission, &raw).await? {
                tracing::warn!(transmission_id = %transmission.transmission_id, "Invalid PayPal webhook signature");
                return Err(ApiError::BadRequest("Invalid webhook signature".into()));
            }
        }
        None => {
            tracing::warn!("PAYPAL_WEBHOOK_ID not configured - skipping signature verification");
        }
    }

    let event: WebhookEvent =
        serde_json::from_value(raw).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = event.id.as_deref().unwrap_or(""),
        "Received PayPal webhook"
    );

    let (Some(status), Some(order_id)) = (event.payment_status(), event.order_id()) else {
        tracing::debug!(event_type = %event.event_type, "Unhandled PayPal event");
        return Ok(Json(WebhookResponse::ignored()));
    };

    match reconcile_payment(state.store.as_ref(), Gateway::PayPal, order_id, status).await {
        Ok(outcome) => Ok(Json(WebhookResponse {
            received: true,
            ignored: false,
            granted: Some(outcome.granted_now),
            credits_granted: Some(outcome.payment.credits_granted),
        })),
        Err(ApiError::NotFound(_)) => {
            tracing::warn!(order_id = %order_id, "PayPal webhook for unknown order");
            Ok(Json(WebhookResponse::ignored()))
        }
        Err(e) => Err(e),
    }
}

/// Bold webhook response.
#[derive(Debug, Serialize)]
pub struct BoldWebhookResponse {
    /// Always true.
    pub ok: bool,
    /// Credits granted by this delivery.
    pub granted: i64,
    /// Credits granted for the payment so far.
    pub credits_granted: i64,
    /// Stored status after reconciliation.
    pub status: PaymentStatus,
}

/// Handle Bold webhooks.
pub async fn bold_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<BoldWebhookResponse>, ApiError> {
    let bold = state.bold()?;
    let signature = headers
        .get("x-bold-signature")
        .and_then(|v| v.to_str().ok());
    bold.verify_webhook_signature(&body, signature)?;

    let webhook: BoldWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let status = normalize_status(&webhook.payment_status)?;

    tracing::info!(
        order_id = %webhook.order_id,
        payment_status = %webhook.payment_status,
        "Received Bold webhook"
    );

    let outcome = reconcile_payment(state.store.as_ref(), Gateway::Bold, &webhook.order_id, status).await?;
    Ok(Json(BoldWebhookResponse {
        ok: true,
        granted: outcome.granted_now,
        credits_granted: outcome.payment.credits_granted,
        status: outcome.payment.status,
    }))
}
