//! Bold client: integrity signatures, webhook signatures and voucher queries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use realmshop_core::{PaymentStatus, ShopError, Username};

use crate::config::BoldConfig;
use crate::crypto::{constant_time_eq, hmac_sha256_hex, sha256_hex};

/// Maximum length of a generated order id.
pub const MAX_ORDER_ID_LEN: usize = 60;

/// Error type for Bold operations.
#[derive(Debug, thiserror::Error)]
pub enum BoldError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Bold returned an error response.
    #[error("Bold API error ({status}): {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Invalid webhook signature.
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Webhook body posted by Bold.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoldWebhook {
    /// Order id we generated at creation.
    pub order_id: String,
    /// `approved`, `rejected`, `pending` or `cancelled`.
    pub payment_status: String,
}

/// Payment voucher as returned by the query API.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentVoucher {
    /// Provider status string.
    pub payment_status: String,
}

/// Bold client.
pub struct BoldClient {
    http: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    webhook_secret: Option<String>,
}

impl std::fmt::Debug for BoldClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoldClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl BoldClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BoldError::Configuration`] when the API or secret key is missing.
    pub fn new(config: &BoldConfig) -> Result<Self, BoldError> {
        let (Some(api_key), Some(secret_key)) = (config.api_key.clone(), config.secret_key.clone())
        else {
            return Err(BoldError::Configuration(
                "BOLD_API_KEY and BOLD_SECRET_KEY are required".into(),
            ));
        };

        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            http,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            secret_key,
            webhook_secret: config.webhook_secret.clone(),
        })
    }

    /// The public API key handed to the checkout button.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Integrity signature over `order_id ‖ amount ‖ currency ‖ secret`.
    #[must_use]
    pub fn integrity_signature(&self, order_id: &str, amount: i64, currency: &str) -> String {
        sha256_hex(&format!("{order_id}{amount}{currency}{}", self.secret_key))
    }

    /// Check the webhook body signature when a webhook secret is configured.
    ///
    /// # Errors
    ///
    /// Returns [`BoldError::InvalidSignature`] if the header is missing or wrong.
    pub fn verify_webhook_signature(
        &self,
        body: &str,
        signature: Option<&str>,
    ) -> Result<(), BoldError> {
        let Some(secret) = &self.webhook_secret else {
            tracing::warn!("BOLD_WEBHOOK_SECRET not configured - skipping signature verification");
            return Ok(());
        };

        let signature = signature.ok_or(BoldError::InvalidSignature)?;
        let expected = hmac_sha256_hex(secret, body.as_bytes());
        if constant_time_eq(&signature.trim().to_ascii_lowercase(), &expected) {
            Ok(())
        } else {
            Err(BoldError::InvalidSignature)
        }
    }

    /// Query the provider for an order's status.
    pub async fn query_status(&self, order_id: &str) -> Result<PaymentStatus, BoldError> {
        let response = self
            .http
            .get(format!("{}/payment-voucher/{order_id}", self.base_url))
            .header("authorization", format!("x-api-key {}", self.api_key))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BoldError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let voucher: PaymentVoucher = response.json().await?;
        normalize_status(&voucher.payment_status).map_err(|e| BoldError::Api {
            status: status.as_u16(),
            message: e.to_string(),
        })
    }
}

/// Build an order id of the form `{username}-{millis}`.
#[must_use]
pub fn generate_order_id(username: &Username, now: DateTime<Utc>) -> String {
    let mut id = format!("{username}-{}", now.timestamp_millis());
    if let Some((idx, _)) = id.char_indices().nth(MAX_ORDER_ID_LEN) {
        id.truncate(idx);
    }
    id
}

/// Map a Bold status string onto the ledger's status set.
///
/// Bold's `approved` is final (funds captured), so it completes the payment.
///
/// # Errors
///
/// Returns [`ShopError::InvalidStatus`] for anything outside the four Bold statuses.
pub fn normalize_status(status: &str) -> Result<PaymentStatus, ShopError> {
    match status.trim().to_ascii_lowercase().as_str() {
        "approved" => Ok(PaymentStatus::Completed),
        "rejected" => Ok(PaymentStatus::Failed),
        "pending" => Ok(PaymentStatus::Pending),
        "cancelled" => Ok(PaymentStatus::Cancelled),
        other => Err(ShopError::InvalidStatus(other.to_string())),
    }
}
