use std::str::FromStr;
use std::time::Duration;

use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

use crate::consumer::ConsumerSettings;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerMode {
    /// Deduplicate the ingest topic and schedule processing tasks.
    Ingest,
    /// Process scheduled tasks into grouped events.
    Tasks,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseConsumerModeError(String);

impl std::fmt::Display for ParseConsumerModeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown consumer mode: {}", self.0)
    }
}

impl std::error::Error for ParseConsumerModeError {}

impl FromStr for ConsumerMode {
    type Err = ParseConsumerModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ingest" => Ok(ConsumerMode::Ingest),
            "tasks" => Ok(ConsumerMode::Tasks),
            other => Err(ParseConsumerModeError(other.to_string())),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "ingest")]
    pub mode: ConsumerMode,

    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(default = "100")]
    pub redis_response_timeout_ms: u64,

    #[envconfig(default = "5000")]
    pub redis_connection_timeout_ms: u64,

    #[envconfig(default = "1")]
    pub worker_count: usize,

    #[envconfig(default = "100")]
    pub batch_size: usize,

    #[envconfig(default = "1000")]
    pub batch_timeout: EnvMsDuration,

    // Lifetime of the "already seen" markers, bounds the deduplication window
    #[envconfig(default = "3600")]
    pub marker_ttl_secs: u64,

    // Lifetime of staged payloads, must outlast the processing queue's backlog
    #[envconfig(default = "3600")]
    pub staged_ttl_secs: u64,

    #[envconfig(default = "ingest_tasks")]
    pub kafka_task_topic: String,

    #[envconfig(default = "grouped_events")]
    pub kafka_events_topic: String,

    // Tasks mode only: print grouped events instead of producing them
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            batch_size: self.batch_size,
            batch_timeout: self.batch_timeout.0,
            marker_ttl: Duration::from_secs(self.marker_ttl_secs),
            staged_ttl: Duration::from_secs(self.staged_ttl_secs),
        }
    }

    /// The consumer subscription for the configured mode. The task worker
    /// reads the task topic under its own group.
    pub fn consumer_config(&self) -> ConsumerConfig {
        match self.mode {
            ConsumerMode::Ingest => self.consumer.clone(),
            ConsumerMode::Tasks => self.consumer.derived(&self.kafka_task_topic, "tasks"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl std::fmt::Display for ParseEnvMsDurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected a duration in milliseconds")
    }
}

impl std::error::Error for ParseEnvMsDurationError {}

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

#[derive(Envconfig, Clone)]
pub struct RetryPolicyConfig {
    // One disables retries: failures go straight to the consumer loop
    #[envconfig(default = "3")]
    pub retry_max_attempts: u32,

    #[envconfig(default = "2")]
    pub retry_backoff_coefficient: u32,

    #[envconfig(default = "100")]
    pub retry_initial_interval: EnvMsDuration,

    #[envconfig(default = "2000")]
    pub retry_maximum_interval: EnvMsDuration,
}

impl RetryPolicyConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            self.retry_backoff_coefficient,
            self.retry_initial_interval.0,
            Some(self.retry_maximum_interval.0),
        )
    }
}
