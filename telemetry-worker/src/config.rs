use envconfig::Envconfig;
use telemetry_common::config::{EnvMsDuration, GcpConfig, NonEmptyString};

use crate::message_id::MessageIdSource;
use crate::pipeline::AnalyticalFailurePolicy;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(nested = true)]
    pub gcp: GcpConfig,

    #[envconfig(from = "SUBSCRIPTION_ID")]
    pub subscription_id: NonEmptyString,

    #[envconfig(from = "BUCKET_NAME")]
    pub bucket_name: NonEmptyString,

    #[envconfig(from = "BIGQUERY_DATASET")]
    pub bigquery_dataset: NonEmptyString,

    #[envconfig(from = "BIGQUERY_TABLE")]
    pub bigquery_table: NonEmptyString,

    #[envconfig(from = "STORAGE_ENDPOINT", default = "https://storage.googleapis.com")]
    pub storage_endpoint: String,

    #[envconfig(from = "BIGQUERY_ENDPOINT", default = "https://bigquery.googleapis.com")]
    pub bigquery_endpoint: String,

    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(from = "WORDS_PATH", default = "words.txt")]
    pub words_path: String,

    #[envconfig(from = "MAX_CONCURRENT_MESSAGES", default = "16")]
    pub max_concurrent_messages: usize,

    #[envconfig(from = "MAX_MESSAGES_PER_PULL", default = "10")]
    pub max_messages_per_pull: usize,

    #[envconfig(from = "POLL_INTERVAL_MS", default = "500")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(from = "SINK_TIMEOUT_MS", default = "10000")]
    pub sink_timeout: EnvMsDuration,

    #[envconfig(from = "HEARTBEAT_INTERVAL_MS", default = "5000")]
    pub heartbeat_interval: EnvMsDuration,

    #[envconfig(from = "LIVENESS_DEADLINE_MS", default = "30000")]
    pub liveness_deadline: EnvMsDuration,

    #[envconfig(from = "SHUTDOWN_DRAIN_MS", default = "30000")]
    pub shutdown_drain: EnvMsDuration,

    #[envconfig(from = "ANALYTICAL_FAILURE_POLICY", default = "acknowledge")]
    pub analytical_failure_policy: AnalyticalFailurePolicy,

    #[envconfig(from = "MESSAGE_ID_SOURCE", default = "delivery")]
    pub message_id_source: MessageIdSource,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
