use envconfig::Envconfig;

/// Broker connection and producer tuning shared by the server and the consumers.
#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // Upper bound on how long a produced event waits for its batch to fill
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32,

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32,

    // Delivery deadline for grouped events and tasks, retries included
    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    // none, gzip, snappy, lz4 or zstd
    #[envconfig(default = "none")]
    pub kafka_compression_codec: String,
}

/// Which topic a consumer reads and under which group it commits.
#[derive(Envconfig, Clone, Debug, PartialEq, Eq)]
pub struct ConsumerConfig {
    #[envconfig(default = "ingest-consumer")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "ingest-events")]
    pub kafka_consumer_topic: String,

    // Where a group without committed offsets starts: earliest or latest
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,
}

impl ConsumerConfig {
    /// A subscription to `topic` under a group derived from this one, so that
    /// two stages of the pipeline never share offsets.
    pub fn derived(&self, topic: &str, group_suffix: &str) -> ConsumerConfig {
        ConsumerConfig {
            kafka_consumer_group: format!("{}-{}", self.kafka_consumer_group, group_suffix),
            kafka_consumer_topic: topic.to_string(),
            kafka_consumer_offset_reset: self.kafka_consumer_offset_reset.clone(),
        }
    }
}
