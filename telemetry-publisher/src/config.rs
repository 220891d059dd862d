use envconfig::Envconfig;
use telemetry_common::config::{EnvMsDuration, GcpConfig, NonEmptyString};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(nested = true)]
    pub gcp: GcpConfig,

    #[envconfig(from = "TOPIC_ID")]
    pub topic_id: NonEmptyString,

    #[envconfig(from = "MESSAGE_COUNT", default = "100")]
    pub message_count: usize,

    #[envconfig(from = "MIN_DELAY_MS", default = "100")]
    pub min_delay: EnvMsDuration,

    #[envconfig(from = "MAX_DELAY_MS", default = "400")]
    pub max_delay: EnvMsDuration,
}
