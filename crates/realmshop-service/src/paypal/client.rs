//! PayPal REST client.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use tokio::sync::RwLock;

use realmshop_core::{format_amount, Username};

use super::types::{
    AccessToken, ApplicationContext, CreateOrderRequest, Money, Order, PayPalErrorResponse,
    PurchaseUnit, Transmission, VerifyWebhookRequest, VerifyWebhookResponse,
};
use crate::config::PayPalConfig;

/// Refresh the token this long before PayPal expires it.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Error type for PayPal operations.
#[derive(Debug, thiserror::Error)]
pub enum PayPalError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// PayPal returned an error response.
    #[error("PayPal API error ({status}): {name} - {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Error name.
        name: String,
        /// Error message.
        message: String,
    },

    /// The gateway response lacked an expected field.
    #[error("unexpected PayPal response: {0}")]
    UnexpectedResponse(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// PayPal REST client (client-credentials OAuth).
pub struct PayPalClient {
    http: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    webhook_id: Option<String>,
    token: RwLock<Option<CachedToken>>,
}

impl std::fmt::Debug for PayPalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayPalClient")
            .field("base_url", &self.base_url)
            .field("webhook_id", &self.webhook_id)
            .finish_non_exhaustive()
    }
}

impl PayPalClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PayPalError::Configuration`] when credentials are missing.
    pub fn new(config: &PayPalConfig) -> Result<Self, PayPalError> {
        let (Some(client_id), Some(client_secret)) =
            (config.client_id.clone(), config.client_secret.clone())
        else {
            return Err(PayPalError::Configuration(
                "PAYPAL_CLIENT_ID and PAYPAL_CLIENT_SECRET are required".into(),
            ));
        };

        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            http,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            webhook_id: config.webhook_id.clone(),
            token: RwLock::new(None),
        })
    }

    /// The configured webhook id, if signature verification is enabled.
    #[must_use]
    pub fn webhook_id(&self) -> Option<&str> {
        self.webhook_id.as_deref()
    }

    /// Get a bearer token, reusing the cached one until shortly before expiry.
    async fn access_token(&self) -> Result<String, PayPalError> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let token: AccessToken = handle_response(response).await?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *self.token.write().await = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        tracing::debug!(expires_in = token.expires_in, "PayPal access token refreshed");

        Ok(token.access_token)
    }

    /// Create a `CAPTURE` order for a donation.
    pub async fn create_order(
        &self,
        amount_cents: i64,
        currency: &str,
        username: &Username,
    ) -> Result<Order, PayPalError> {
        let body = CreateOrderRequest {
            intent: "CAPTURE",
            purchase_units: vec![PurchaseUnit {
                reference_id: username.to_string(),
                amount: Money {
                    currency_code: currency.to_string(),
                    value: format_amount(amount_cents),
                },
            }],
            application_context: ApplicationContext {
                shipping_preference: "NO_SHIPPING",
                user_action: "PAY_NOW",
            },
        };

        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        handle_response(response).await
    }

    /// Capture an approved order.
    pub async fn capture_order(&self, order_id: &str) -> Result<Order, PayPalError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/v2/checkout/orders/{order_id}/capture", self.base_url))
            .bearer_auth(token)
            .header("content-type", "application/json")
            .send()
            .await?;

        handle_response(response).await
    }

    /// Fetch an order's current state.
    pub async fn get_order(&self, order_id: &str) -> Result<Order, PayPalError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{}/v2/checkout/orders/{order_id}", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;

        handle_response(response).await
    }

    /// Capture an order, falling back to a status query when PayPal refuses the
    /// capture (for example because a webhook-triggered capture already ran).
    pub async fn capture_or_query(&self, order_id: &str) -> Result<Order, PayPalError> {
        match self.capture_order(order_id).await {
            Err(PayPalError::Api { status, name, .. })
                if status == StatusCode::UNPROCESSABLE_ENTITY.as_u16() =>
            {
                tracing::info!(order_id = %order_id, error = %name, "PayPal capture refused, querying order");
                self.get_order(order_id).await
            }
            other => other,
        }
    }

    /// Ask PayPal whether a webhook delivery is authentic.
    pub async fn verify_webhook(
        &self,
        transmission: &Transmission,
        event: &serde_json::Value,
    ) -> Result<bool, PayPalError> {
        let webhook_id = self
            .webhook_id
            .as_deref()
            .ok_or_else(|| PayPalError::Configuration("PAYPAL_WEBHOOK_ID not configured".into()))?;

        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                self.base_url
            ))
            .bearer_auth(token)
            .json(&VerifyWebhookRequest {
                transmission,
                webhook_id,
                webhook_event: event,
            })
            .send()
            .await?;

        let verdict: VerifyWebhookResponse = handle_response(response).await?;
        Ok(verdict.verification_status.eq_ignore_ascii_case("SUCCESS"))
    }
}

/// Decode a success body or convert an error body.
async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, PayPalError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let error: PayPalErrorResponse = serde_json::from_str(&body).unwrap_or_default();
    tracing::warn!(status = %status, body = %body, "PayPal API returned an error");

    Err(PayPalError::Api {
        status: status.as_u16(),
        name: error.name.unwrap_or_else(|| "UNKNOWN".into()),
        message: error.message.unwrap_or(body),
    })
}
