//! Payment reconciliation.
//!
//! Capture responses, status queries and webhooks all land here. The store
//! applies the transition under the payment row lock; this layer only logs what
//! happened.

use realmshop_core::{Gateway, PaymentStatus, Reconciled};
use realmshop_store::Store;

use crate::error::ApiError;

/// Apply an incoming gateway status to a stored payment.
///
/// Repeating the call for a completed payment is a successful no-op that returns
/// the stored record unchanged.
pub async fn reconcile_payment(
    store: &dyn Store,
    gateway: Gateway,
    external_id: &str,
    status: PaymentStatus,
) -> Result<Reconciled, ApiError> {
    let outcome = store.reconcile_donation(gateway, external_id, status).await?;
    let payment = &outcome.payment;

    if outcome.granted_now > 0 {
        tracing::info!(
            gateway = %gateway,
            external_id = %external_id,
            username = %payment.username,
            credits = outcome.granted_now,
            "Donation completed, credits granted"
        );
    } else if outcome.changed {
        tracing::info!(
            gateway = %gateway,
            external_id = %external_id,
            status = %payment.status,
            "Donation status advanced"
        );
    } else {
        tracing::debug!(
            gateway = %gateway,
            external_id = %external_id,
            stored = %payment.status,
            incoming = %status,
            "Donation unchanged"
        );
    }

    Ok(outcome)
}
