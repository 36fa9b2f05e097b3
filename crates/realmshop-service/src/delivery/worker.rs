//! Background delivery worker.

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::{DeliveryDispatcher, JOBS_PER_PASS};

/// Spawn the outbox worker.
///
/// The worker drains open jobs, then sleeps until it is notified or the poll
/// interval elapses. Polling picks up jobs whose lease lapsed after a crash.
pub fn spawn(dispatcher: Arc<DeliveryDispatcher>) -> JoinHandle<()> {
    let wakeup = dispatcher.wakeup();
    let poll = dispatcher.poll_interval();

    tokio::spawn(async move {
        tracing::info!(poll_seconds = poll.as_secs(), "Delivery worker started");
        loop {
            match dispatcher.run_pending().await {
                Ok(n) if n >= JOBS_PER_PASS as usize => continue,
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Delivery pass failed"),
            }

            tokio::select! {
                () = wakeup.notified() => {}
                () = tokio::time::sleep(poll) => {}
            }
        }
    })
}
