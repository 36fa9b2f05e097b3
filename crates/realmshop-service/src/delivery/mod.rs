//! Delivery dispatcher.
//!
//! Turns a committed purchase into `send items` commands on the realm's remote
//! channel and records the outcome on the purchase. Work arrives through the
//! durable `delivery_jobs` outbox, so a crash between commit and dispatch only
//! delays delivery until the job lease lapses.

pub mod soap;
pub mod worker;

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Notify;

use realmshop_core::{
    render_command, summarize, BatchOutcome, DeliveryPlan, DeliveryRecord, DeliveryStatus,
    Purchase, PurchaseId, RealmChannel, REASON_CHANNEL_DISABLED, REASON_NO_RECIPIENT,
};
use realmshop_store::{DeliveryJob, Store, StoreError};

pub use soap::{ChannelError, SoapClient};

use crate::config::DeliveryConfig;

/// Jobs claimed per worker pass.
pub const JOBS_PER_PASS: u32 = 16;

/// Error type for a delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Storage failed before anything was dispatched.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Batches went out but their outcome could not be stored.
    #[error("delivery dispatched but not recorded: {0}")]
    Unrecorded(StoreError),
}

impl DeliveryError {
    /// Whether the attempt may run again. Never true once batches went out.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Unrecorded(_) => false,
        }
    }
}

/// Dispatches purchases to the game world.
pub struct DeliveryDispatcher {
    store: Arc<dyn Store>,
    channel: SoapClient,
    config: DeliveryConfig,
    wakeup: Arc<Notify>,
}

impl std::fmt::Debug for DeliveryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryDispatcher")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl DeliveryDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: DeliveryConfig) -> Self {
        Self {
            store,
            channel: SoapClient::new(),
            config,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Wake the worker; called after a purchase or resend commits.
    pub fn notify(&self) {
        self.wakeup.notify_one();
    }

    pub(crate) fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    pub(crate) fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.poll_seconds.max(1))
    }

    /// Deliver one purchase and record the outcome.
    ///
    /// The purchase moves to `sending` before the first batch goes out, so a
    /// second attempt (a duplicate job, a reclaimed lease) finds it held and
    /// skips it. A purchase already marked sent is left alone unless `force` is
    /// set. Channel failures are recorded on the purchase, not returned.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Unrecorded`] when batches went out but the outcome could
    /// not be stored; the purchase stays `sending` until an admin resends it.
    pub async fn deliver(&self, purchase_id: PurchaseId, force: bool) -> Result<Purchase, DeliveryError> {
        let purchase = self
            .store
            .get_purchase(purchase_id)
            .await?
            .ok_or_else(|| StoreError::not_found("purchase", purchase_id))?;
        if !purchase.delivery_status.may_dispatch(force, true) {
            tracing::debug!(purchase_id = %purchase_id, status = %purchase.delivery_status, "Nothing to deliver, skipping");
            return Ok(purchase);
        }

        let channel = self.channel_for(&purchase).await?;
        let entries = DeliveryPlan::entries(&purchase.lines);
        let sizes = self.store.stack_sizes(&entries).await?;

        let Some(purchase) = self.store.begin_delivery(purchase_id, force).await? else {
            tracing::debug!(purchase_id = %purchase_id, "Delivery held by another attempt, skipping");
            return Ok(purchase);
        };

        let Some(recipient) = purchase.recipient.clone() else {
            tracing::warn!(purchase_id = %purchase_id, "No recipient, delivery left pending");
            return Ok(self.mark_pending(purchase_id, REASON_NO_RECIPIENT).await?);
        };

        let Some(channel) = channel else {
            tracing::warn!(
                purchase_id = %purchase_id,
                realm_id = ?purchase.realm_id,
                "Remote channel unavailable, delivery left pending"
            );
            return Ok(self.mark_pending(purchase_id, REASON_CHANNEL_DISABLED).await?);
        };

        let plan = DeliveryPlan::build(&purchase.lines, |entry| sizes.get(&entry).copied());

        let mut outcomes = Vec::with_capacity(plan.batches.len());
        for (n, batch) in plan.batches.iter().enumerate() {
            let command = render_command(&recipient.name, &self.config.template, batch);
            match self.channel.execute(&channel, &command).await {
                Ok(text) => {
                    tracing::info!(purchase_id = %purchase_id, batch = n + 1, stacks = batch.len(), "Batch dispatched");
                    outcomes.push(BatchOutcome::Sent(text));
                }
                Err(e) => {
                    tracing::warn!(purchase_id = %purchase_id, batch = n + 1, error = %e, "Batch failed");
                    outcomes.push(BatchOutcome::Failed(e.to_string()));
                }
            }
        }

        let record = summarize(&outcomes);
        let updated = self
            .store
            .record_delivery(purchase_id, &record)
            .await
            .map_err(DeliveryError::Unrecorded)?;
        tracing::info!(
            purchase_id = %purchase_id,
            status = %record.status,
            batches = outcomes.len(),
            "Delivery recorded"
        );
        Ok(updated)
    }

    /// Claim open outbox jobs and deliver them concurrently.
    ///
    /// Returns the number of jobs claimed. Jobs that fail with a retryable
    /// storage error before anything was dispatched stay open and are picked up
    /// again once their lease lapses.
    pub async fn run_pending(&self) -> Result<usize, StoreError> {
        let jobs = self.store.claim_delivery_jobs(JOBS_PER_PASS).await?;
        let claimed = jobs.len();
        join_all(jobs.into_iter().map(|job| self.run_job(job))).await;
        Ok(claimed)
    }

    async fn run_job(&self, job: DeliveryJob) {
        match self.deliver(job.purchase_id, job.force).await {
            Ok(_) => {}
            Err(e) if e.is_retryable() => {
                tracing::warn!(job_id = %job.id, purchase_id = %job.purchase_id, error = %e, "Delivery job will be retried");
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, purchase_id = %job.purchase_id, error = %e, "Delivery job dropped");
            }
        }
        if let Err(e) = self.store.complete_delivery_job(job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to complete delivery job");
        }
    }

    /// The stored channel for the purchase's realm, else the env fallback.
    async fn channel_for(&self, purchase: &Purchase) -> Result<Option<RealmChannel>, StoreError> {
        let stored = match purchase.realm_id {
            Some(realm) => self.store.realm_channel(realm).await?,
            None => None,
        };
        Ok(match stored {
            Some(channel) => channel.enabled.then_some(channel),
            None => self.config.fallback_channel(purchase.realm_id),
        })
    }

    async fn mark_pending(&self, purchase_id: PurchaseId, reason: &str) -> Result<Purchase, StoreError> {
        self.store
            .record_delivery(purchase_id, &DeliveryRecord::new(DeliveryStatus::Pending, reason))
            .await
    }
}
