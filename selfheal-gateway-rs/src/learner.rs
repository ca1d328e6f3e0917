// selfheal-gateway-rs/src/learner.rs
//
// Background stream learner: one long-lived task per process that joins a
// shared consumer group on the failure-event log and independently derives
// and persists healing rules for the events it receives. This is the
// asynchronous, redundant learning path - it also captures failures from
// requests that exhausted their synchronous retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::proposer::RuleProposer;
use crate::store::{FailureDelivery, RuleStore, StoreError};

/// Pause between read attempts after a read-level error, so a store
/// outage does not turn the loop into a busy spin.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct LearnerConfig {
    /// Consumer group shared by all running instances.
    pub consumer_group: String,
    /// Blocking-read timeout per poll.
    pub block_ms: u64,
}

/// Handle to the spawned learner task. Dropping it without calling
/// `shutdown` detaches the task; it will keep running until process exit.
pub struct StreamLearner {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    consumer_name: String,
}

impl StreamLearner {
    /// Spawn the learner loop. Each instance gets a unique consumer
    /// identity so multiple processes share the backlog without
    /// duplicate processing under normal operation.
    pub fn spawn(
        store: Arc<dyn RuleStore>,
        proposer: Arc<dyn RuleProposer>,
        config: LearnerConfig,
    ) -> Self {
        let consumer_name = format!("worker-{}", uuid::Uuid::new_v4());
        let (stop_tx, stop_rx) = watch::channel(false);

        let task_consumer = consumer_name.clone();
        let handle = tokio::spawn(async move {
            run_loop(store, proposer, config, task_consumer, stop_rx).await;
        });

        Self {
            stop_tx,
            handle,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Cooperative shutdown: flip the stop flag and wait at most `grace`
    /// for the loop to exit (it honors the flag at the top of each
    /// iteration, so one in-flight read timeout is the worst case).
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.stop_tx.send(true);
        if tokio::time::timeout(grace, self.handle).await.is_err() {
            warn!("stream learner did not stop within grace period");
        }
    }
}

async fn run_loop(
    store: Arc<dyn RuleStore>,
    proposer: Arc<dyn RuleProposer>,
    config: LearnerConfig,
    consumer_name: String,
    mut stop_rx: watch::Receiver<bool>,
) {
    // Idempotent group creation: "already exists" is the normal case
    // after a restart. A hard failure here still lets the loop retry the
    // read path, which re-surfaces the error.
    if let Err(e) = store.ensure_consumer_group(&config.consumer_group).await {
        error!(error = %e, group = %config.consumer_group, "failed to create consumer group");
    }

    info!(
        group = %config.consumer_group,
        consumer = %consumer_name,
        "stream learner started"
    );

    loop {
        if *stop_rx.borrow() {
            break;
        }

        match store
            .read_failure_events(&config.consumer_group, &consumer_name, 1, config.block_ms)
            .await
        {
            Ok(deliveries) => {
                for delivery in deliveries {
                    if let Err(e) = process_event(&*store, &*proposer, &delivery).await {
                        // At-most-once learning: the record is acknowledged
                        // below even though this attempt failed. The
                        // synchronous path re-learns from the next request.
                        error!(id = %delivery.id, error = %e, "failed to process failure event");
                    }
                    if let Err(e) = store
                        .ack_failure_event(&config.consumer_group, &delivery.id)
                        .await
                    {
                        error!(id = %delivery.id, error = %e, "failed to acknowledge failure event");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "error reading from failure stream");
                // Stop-aware pause before retrying.
                tokio::select! {
                    _ = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
                    _ = stop_rx.changed() => {}
                }
            }
        }
    }

    info!(consumer = %consumer_name, "stream learner shutting down");
}

/// Derive rules for one failure event and persist what was learned.
/// Missing event fields arrive as empty strings and simply produce an
/// empty proposal.
async fn process_event(
    store: &dyn RuleStore,
    proposer: &dyn RuleProposer,
    delivery: &FailureDelivery,
) -> Result<(), StoreError> {
    let event = &delivery.event;
    info!(target = %event.target, error = %event.error, "processing failure event");

    let plan = proposer
        .propose(&event.target, &event.payload_json, &event.error)
        .await;

    if plan.is_empty() {
        info!(target = %event.target, "no healing suggestions for failure event");
        return Ok(());
    }

    if let Some(endpoint) = plan.endpoint.as_deref() {
        store.save_endpoint_rule(&event.target, endpoint).await?;
        info!(target = %event.target, endpoint, "saved endpoint rewrite");
    }

    for (from, to) in &plan.field_mappings {
        store.save_field_mapping(&event.target, from, to).await?;
        info!(target = %event.target, from = %from, to = %to, "saved field mapping");
    }

    Ok(())
}
