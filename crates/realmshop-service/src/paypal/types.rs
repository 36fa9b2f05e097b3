//! PayPal REST API types.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use realmshop_core::PaymentStatus;

/// Webhook event that marks an order approved by the buyer.
pub const EVENT_ORDER_APPROVED: &str = "CHECKOUT.ORDER.APPROVED";

/// Webhook event that marks a capture completed.
pub const EVENT_CAPTURE_COMPLETED: &str = "PAYMENT.CAPTURE.COMPLETED";

/// OAuth client-credentials token.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    /// Bearer token.
    pub access_token: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: u64,
}

/// A HATEOAS link.
#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    /// Target URL.
    pub href: String,
    /// Relation name.
    pub rel: String,
}

/// A checkout order.
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    /// Order id.
    pub id: String,
    /// Order status (CREATED, APPROVED, COMPLETED, ...).
    #[serde(default)]
    pub status: String,
    /// Related links.
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Order {
    /// The URL the buyer must visit to approve the order.
    #[must_use]
    pub fn approve_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.as_str())
    }

    /// The order status in ledger terms.
    #[must_use]
    pub fn payment_status(&self) -> Option<PaymentStatus> {
        self.status.parse().ok()
    }
}

/// Create-order request body.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    /// Always `CAPTURE`.
    pub intent: &'static str,
    /// Single purchase unit.
    pub purchase_units: Vec<PurchaseUnit>,
    /// Checkout behavior.
    pub application_context: ApplicationContext,
}

/// A purchase unit.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseUnit {
    /// The donating account.
    pub reference_id: String,
    /// Amount.
    pub amount: Money,
}

/// An amount with currency.
#[derive(Debug, Clone, Serialize)]
pub struct Money {
    /// ISO currency code.
    pub currency_code: String,
    /// Two-decimal amount.
    pub value: String,
}

/// Checkout behavior flags.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationContext {
    /// Digital goods need no shipping.
    pub shipping_preference: &'static str,
    /// Show "Pay Now" rather than "Continue".
    pub user_action: &'static str,
}

/// Webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event id.
    #[serde(default)]
    pub id: Option<String>,
    /// Event type.
    pub event_type: String,
    /// Event resource.
    #[serde(default)]
    pub resource: serde_json::Value,
}

impl WebhookEvent {
    /// The checkout order this event refers to.
    ///
    /// Capture events carry the order id under `supplementary_data.related_ids`;
    /// order events carry it as the resource id.
    #[must_use]
    pub fn order_id(&self) -> Option<&str> {
        self.resource
            .pointer("/supplementary_data/related_ids/order_id")
            .and_then(|v| v.as_str())
            .or_else(|| self.resource.get("id").and_then(|v| v.as_str()))
            .filter(|id| !id.is_empty())
    }

    /// The ledger status this event implies, if it is one we act on.
    #[must_use]
    pub fn payment_status(&self) -> Option<PaymentStatus> {
        match self.event_type.as_str() {
            EVENT_ORDER_APPROVED => {
                let completed = self
                    .resource
                    .get("status")
                    .and_then(|v| v.as_str())
                    .is_some_and(|s| s.eq_ignore_ascii_case("COMPLETED"));
                Some(if completed {
                    PaymentStatus::Completed
                } else {
                    PaymentStatus::Approved
                })
            }
            EVENT_CAPTURE_COMPLETED => Some(PaymentStatus::Completed),
            _ => None,
        }
    }
}

/// Transmission headers PayPal attaches to webhook deliveries.
#[derive(Debug, Clone, Serialize)]
pub struct Transmission {
    /// `PAYPAL-AUTH-ALGO`.
    pub auth_algo: String,
    /// `PAYPAL-CERT-URL`.
    pub cert_url: String,
    /// `PAYPAL-TRANSMISSION-ID`.
    pub transmission_id: String,
    /// `PAYPAL-TRANSMISSION-SIG`.
    pub transmission_sig: String,
    /// `PAYPAL-TRANSMISSION-TIME`.
    pub transmission_time: String,
}

impl Transmission {
    /// Collect the transmission headers; `None` if any is missing.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Some(Self {
            auth_algo: get("paypal-auth-algo")?,
            cert_url: get("paypal-cert-url")?,
            transmission_id: get("paypal-transmission-id")?,
            transmission_sig: get("paypal-transmission-sig")?,
            transmission_time: get("paypal-transmission-time")?,
        })
    }
}

/// Verify-webhook-signature request body.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyWebhookRequest<'a> {
    /// Transmission headers.
    #[serde(flatten)]
    pub transmission: &'a Transmission,
    /// Configured webhook id.
    pub webhook_id: &'a str,
    /// The event exactly as received.
    pub webhook_event: &'a serde_json::Value,
}

/// Verify-webhook-signature response.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyWebhookResponse {
    /// `SUCCESS` or `FAILURE`.
    pub verification_status: String,
}

/// PayPal error body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayPalErrorResponse {
    /// Error name.
    #[serde(default)]
    pub name: Option<String>,
    /// Error message.
    #[serde(default)]
    pub message: Option<String>,
}
