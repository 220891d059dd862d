use std::sync::Arc;
use std::time;

use health::HealthHandle;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::feed::{Delivery, Subscription};
use crate::pipeline::{Decision, IngestionPipeline};

/// Pulls deliveries from a `Subscription` and runs each through the
/// pipeline in its own task, with at most `max_concurrent_messages` runs in
/// flight.
pub struct IngestionWorker {
    /// The feed we pull deliveries from and settle them on.
    subscription: Arc<dyn Subscription>,
    pipeline: IngestionPipeline,
    /// Maximum number of pipeline runs in flight.
    max_concurrent_messages: usize,
    max_messages_per_pull: usize,
    /// How long to wait after an empty or failed pull.
    poll_interval: time::Duration,
    /// How long in-flight runs get to finish once shutdown is requested.
    shutdown_drain: time::Duration,
    /// The liveness check handle, reported after every successful pull.
    liveness: HealthHandle,
}

impl IngestionWorker {
    pub fn new(
        subscription: Arc<dyn Subscription>,
        pipeline: IngestionPipeline,
        max_concurrent_messages: usize,
        max_messages_per_pull: usize,
        poll_interval: time::Duration,
        shutdown_drain: time::Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            subscription,
            pipeline,
            max_concurrent_messages: max_concurrent_messages.max(1),
            max_messages_per_pull: max_messages_per_pull.max(1),
            poll_interval,
            shutdown_drain,
            liveness,
        }
    }

    /// Run until `shutdown` flips to true (or its sender is dropped), then
    /// wait up to the drain period for in-flight runs. Runs still going after
    /// that are left unsettled, and the feed will redeliver them.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_messages));
        let report_semaphore_utilization = || {
            metrics::gauge!("telemetry_worker_saturation_percent").set(
                1f64 - semaphore.available_permits() as f64 / self.max_concurrent_messages as f64,
            );
        };

        while !*shutdown.borrow() {
            report_semaphore_utilization();

            // Hold one slot before pulling so every pulled delivery can start right away.
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit?,
                _ = shutdown.changed() => break,
            };
            let batch = self
                .max_messages_per_pull
                .min(1 + semaphore.available_permits());

            let pulled = tokio::select! {
                pulled = self.subscription.pull(batch) => pulled,
                _ = shutdown.changed() => break,
            };

            let deliveries = match pulled {
                Ok(deliveries) => {
                    self.liveness.report_healthy();
                    deliveries
                }
                Err(error) => {
                    metrics::counter!("telemetry_feed_pull_errors_total").increment(1);
                    error!(%error, "failed to pull from feed");
                    drop(permit);
                    if self.wait(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            if deliveries.is_empty() {
                drop(permit);
                if self.wait(&mut shutdown).await {
                    break;
                }
                continue;
            }

            debug!(count = deliveries.len(), "pulled deliveries");
            let mut permit = Some(permit);
            for delivery in deliveries {
                let permit = match permit.take() {
                    Some(permit) => permit,
                    None => semaphore.clone().acquire_owned().await?,
                };
                let subscription = self.subscription.clone();
                let pipeline = self.pipeline.clone();

                tokio::spawn(async move {
                    handle_delivery(subscription.as_ref(), &pipeline, delivery).await;
                    drop(permit);
                });
            }
        }

        self.drain(&semaphore).await
    }

    /// Sleep for the poll interval. Returns true if shutdown was signalled meanwhile.
    async fn wait(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => false,
            _ = shutdown.changed() => true,
        }
    }

    async fn drain(&self, semaphore: &Semaphore) -> Result<(), WorkerError> {
        let in_flight = self.max_concurrent_messages - semaphore.available_permits();
        info!(in_flight, "shutting down, draining in-flight messages");

        let all_permits = u32::try_from(self.max_concurrent_messages).unwrap_or(u32::MAX);
        match tokio::time::timeout(self.shutdown_drain, semaphore.acquire_many(all_permits)).await
        {
            Ok(permits) => {
                drop(permits?);
                info!("drained all in-flight messages");
            }
            Err(_) => {
                let abandoned = self.max_concurrent_messages - semaphore.available_permits();
                warn!(
                    abandoned,
                    "drain period elapsed, unsettled messages will be redelivered"
                );
            }
        }
        Ok(())
    }
}

/// Run one delivery through the pipeline and settle it on the feed. Failure
/// to settle is only logged: the feed redelivers anything left unsettled.
pub async fn handle_delivery(
    subscription: &dyn Subscription,
    pipeline: &IngestionPipeline,
    delivery: Delivery,
) -> Decision {
    let outcome = pipeline
        .process(&delivery.payload, delivery.message_id.as_deref())
        .await;
    let decision = outcome.decision();

    let (settled, label) = match decision {
        Decision::Ack => (subscription.ack(&delivery.ack_id).await, "ack"),
        Decision::Nack => (subscription.nack(&delivery.ack_id).await, "nack"),
    };

    match settled {
        Ok(()) => debug!(
            message_id = %outcome.message_id(),
            ack_id = %delivery.ack_id,
            attempt = ?delivery.attempt,
            decision = label,
            "delivery settled"
        ),
        Err(error) => {
            metrics::counter!("telemetry_feed_settle_errors_total", "decision" => label)
                .increment(1);
            error!(
                message_id = %outcome.message_id(),
                ack_id = %delivery.ack_id,
                attempt = ?delivery.attempt,
                decision = label,
                %error,
                "failed to settle delivery"
            );
        }
    }
    decision
}
