//! Application state.

use std::sync::Arc;

use realmshop_store::Store;

use crate::bold::BoldClient;
use crate::config::ServiceConfig;
use crate::delivery::DeliveryDispatcher;
use crate::paypal::PayPalClient;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// PayPal client (optional).
    pub paypal: Option<Arc<PayPalClient>>,

    /// Bold client (optional).
    pub bold: Option<Arc<BoldClient>>,

    /// Delivery dispatcher, shared with the background worker.
    pub delivery: Arc<DeliveryDispatcher>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let paypal = match PayPalClient::new(&config.paypal) {
            Ok(client) => {
                tracing::info!(api_base = %config.paypal.api_base, "PayPal integration enabled");
                Some(Arc::new(client))
            }
            Err(e) => {
                tracing::warn!(error = %e, "PayPal not configured - PayPal donations unavailable");
                None
            }
        };

        let bold = match BoldClient::new(&config.bold) {
            Ok(client) => {
                tracing::info!("Bold integration enabled");
                Some(Arc::new(client))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Bold not configured - Bold donations unavailable");
                None
            }
        };

        if config.delivery.soap_endpoint.is_none() {
            tracing::warn!("SOAP_ENDPOINT not set - only realms with stored channels can receive deliveries");
        }

        let delivery = Arc::new(DeliveryDispatcher::new(
            Arc::clone(&store),
            config.delivery.clone(),
        ));

        Self {
            store,
            config,
            paypal,
            bold,
            delivery,
        }
    }

    /// The PayPal client, or a 503 if it is not configured.
    pub fn paypal(&self) -> Result<&PayPalClient, crate::ApiError> {
        self.paypal.as_deref().ok_or(crate::ApiError::NotConfigured("PayPal"))
    }

    /// The Bold client, or a 503 if it is not configured.
    pub fn bold(&self) -> Result<&BoldClient, crate::ApiError> {
        self.bold.as_deref().ok_or(crate::ApiError::NotConfigured("Bold"))
    }
}
