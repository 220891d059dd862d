use std::time;

use health::HealthHandle;
use tokio::sync::watch;
use tracing::info;

/// Log a beat and report liveness every `interval` until shutdown.
pub async fn run_heartbeat(
    interval: time::Duration,
    liveness: HealthHandle,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    let mut beats: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        beats += 1;
        liveness.report_healthy();
        metrics::counter!("telemetry_heartbeats_total").increment(1);
        info!(beats, "heartbeat");
    }
    beats
}

#[cfg(test)]
mod tests {
    use health::HealthRegistry;

    use super::*;

    #[tokio::test]
    async fn beats_until_shutdown() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("heartbeat", time::Duration::from_secs(30));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let heartbeat = tokio::spawn(run_heartbeat(
            time::Duration::from_millis(10),
            handle,
            shutdown_rx,
        ));

        tokio::time::sleep(time::Duration::from_millis(100)).await;
        assert!(registry.get_status().healthy);

        shutdown_tx.send(true).unwrap();
        let beats = heartbeat.await.unwrap();
        assert!(beats >= 2, "only {beats} beats");
    }
}
