//! Consume telemetry from the feed subscription into the object store and the analytical table.
use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use health::HealthRegistry;
use telemetry_common::metrics::{serve, setup_metrics_routes};
use telemetry_common::pubsub::PubSubClient;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use telemetry_worker::config::Config;
use telemetry_worker::error::StartupError;
use telemetry_worker::feed::PubSubSubscription;
use telemetry_worker::heartbeat::run_heartbeat;
use telemetry_worker::message_id::{MessageIdGenerator, WordList};
use telemetry_worker::pipeline::IngestionPipeline;
use telemetry_worker::sinks::bigquery::BigQuerySink;
use telemetry_worker::sinks::storage::GcsObjectStore;
use telemetry_worker::sinks::DualSinkWriter;
use telemetry_worker::time::SystemTime;
use telemetry_worker::worker::IngestionWorker;

async fn shutdown_signal() {
    let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(term) => term,
        Err(error) => {
            error!(%error, "failed to register SIGTERM handler, only SIGINT will stop the worker");
            if let Err(error) = signal::ctrl_c().await {
                error!(%error, "failed to listen for SIGINT");
            }
            return;
        }
    };

    tokio::select! {
        _ = term.recv() => {},
        _ = signal::ctrl_c() => {},
    };

    info!("Shutting down gracefully...");
}

/// Tell the heartbeat and the server to stop, then wait for both. The
/// worker may have stopped on its own, so this never waits for a signal.
async fn stop_background_tasks(
    shutdown_tx: &watch::Sender<bool>,
    heartbeat: JoinHandle<u64>,
    server: JoinHandle<std::io::Result<()>>,
) {
    shutdown_tx.send_replace(true);

    if let Err(error) = heartbeat.await {
        error!(%error, "heartbeat task failed");
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => error!(%error, "metrics server failed"),
        Err(error) => error!(%error, "metrics server task failed"),
    }
}

pub async fn index() -> &'static str {
    "telemetry worker"
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::init_from_env()?;

    let words = WordList::load(&config.words_path)?;
    info!(
        project = %config.gcp.project_id,
        subscription = %config.subscription_id,
        bucket = %config.bucket_name,
        table = %format!("{}.{}", config.bigquery_dataset, config.bigquery_table),
        words = words.len(),
        "starting telemetry worker"
    );

    let liveness = HealthRegistry::new("liveness");
    let heartbeat_liveness = liveness.register("heartbeat", config.liveness_deadline.0);
    let subscriber_liveness = liveness.register("subscriber", config.liveness_deadline.0);

    let client = config.gcp.http_client("telemetry-worker")?;
    let pubsub = PubSubClient::new(
        client.clone(),
        &config.gcp.pubsub_endpoint,
        config.gcp.project_id.as_str(),
    )?;
    let objects = GcsObjectStore::new(
        client.clone(),
        &config.storage_endpoint,
        config.bucket_name.as_str(),
    )?;
    let analytical = BigQuerySink::new(
        client,
        &config.bigquery_endpoint,
        config.gcp.project_id.as_str(),
        config.bigquery_dataset.as_str(),
        config.bigquery_table.as_str(),
    )?;

    let pipeline = IngestionPipeline::new(
        MessageIdGenerator::new(words, config.message_id_source),
        DualSinkWriter::new(
            Arc::new(objects),
            Arc::new(analytical),
            config.sink_timeout.0,
        ),
        Arc::new(SystemTime::default()),
        config.analytical_failure_policy,
    );

    let worker = IngestionWorker::new(
        Arc::new(PubSubSubscription::new(
            pubsub,
            config.subscription_id.as_str(),
        )),
        pipeline,
        config.max_concurrent_messages,
        config.max_messages_per_pull,
        config.poll_interval.0,
        config.shutdown_drain.0,
        subscriber_liveness,
    );

    let router = Router::new()
        .route("/", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_routes(router)?;

    let bind = config.bind();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|error| StartupError::Bind {
            address: bind.clone(),
            error,
        })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let server_shutdown = {
        let mut shutdown = shutdown_rx.clone();
        async move {
            // Resolves on the signal, or when the sender goes away.
            drop(shutdown.wait_for(|stop| *stop).await);
        }
    };
    let server = tokio::spawn(serve(router, listener, server_shutdown));

    let heartbeat = tokio::spawn(run_heartbeat(
        config.heartbeat_interval.0,
        heartbeat_liveness,
        shutdown_rx.clone(),
    ));

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        if signal_tx.send(true).is_err() {
            info!("everything already stopped");
        }
    });

    let result = worker.run(shutdown_rx).await;
    if let Err(error) = &result {
        error!(%error, "worker stopped unexpectedly");
    }

    stop_background_tasks(&shutdown_tx, heartbeat, server).await;

    result?;
    info!("telemetry worker stopped");
    Ok(())
}
