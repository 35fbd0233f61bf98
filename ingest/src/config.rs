use std::net::SocketAddr;
use std::time::Duration;

use common_kafka::config::KafkaConfig;
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(default = "100")]
    pub redis_response_timeout_ms: u64,

    #[envconfig(default = "5000")]
    pub redis_connection_timeout_ms: u64,

    // "<public_key>:<secret_key>:<tenant_id>;...", replaces the redis credential store when set
    pub credentials: Option<String>,

    // Single-tenant mode: used for requests that carry no sentry_key
    pub default_secret: Option<String>,

    #[envconfig(default = "1")]
    pub default_tenant_id: i64,

    #[envconfig(default = "3600")]
    pub replay_window_secs: u64,

    #[envconfig(default = "1048576")]
    pub max_body_size: usize,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "ingest")]
    pub otel_service_name: String,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "grouped_events")]
    pub kafka_events_topic: String,
}

impl Config {
    pub fn replay_window(&self) -> Duration {
        Duration::from_secs(self.replay_window_secs)
    }
}

/// Zero means "no timeout".
pub fn optional_timeout(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}
