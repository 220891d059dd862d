//! Publish synthetic sensor payloads to the feed topic for local testing.
use anyhow::Context;
use envconfig::Envconfig;
use rand::Rng;
use telemetry_common::pubsub::{PubSubClient, PubsubMessage};
use time::OffsetDateTime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use telemetry_publisher::config::Config;
use telemetry_publisher::generator::generate_raw_message;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::init_from_env().context("invalid configuration")?;
    let client = config
        .gcp
        .http_client("telemetry-publisher")
        .context("failed to build http client")?;
    let pubsub = PubSubClient::new(
        client,
        &config.gcp.pubsub_endpoint,
        config.gcp.project_id.as_str(),
    )
    .context("failed to create feed client")?;

    let topic = config.topic_id.as_str();
    info!(topic = %pubsub.topic_path(topic), "starting publisher");

    let min_delay = config.min_delay.0;
    let max_delay = config.max_delay.0.max(min_delay);
    let total = config.message_count;

    for i in 1..=total {
        let message = generate_raw_message(&mut rand::thread_rng(), OffsetDateTime::now_utc());
        let payload = message.to_string();

        match pubsub
            .publish(topic, &[PubsubMessage::from_bytes(payload.as_bytes())])
            .await
        {
            Ok(ids) => info!(?ids, "published message {i}/{total}: {payload}"),
            Err(error) => error!(%error, "error publishing message {i}"),
        }

        let delay = rand::thread_rng().gen_range(min_delay..=max_delay);
        tokio::time::sleep(delay).await;
    }

    info!("finished publishing synthetic telemetry");
    Ok(())
}
