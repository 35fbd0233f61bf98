use std::time::Duration;

use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};
use tracing::{debug, info};

use crate::config::{ConsumerConfig, KafkaConfig};

/// A single-topic consumer that hands out raw payloads in bounded batches and
/// only commits when asked to. Offsets are never committed in the background,
/// a crash before `commit_sync` replays everything since the last commit.
pub struct BatchConsumer {
    consumer: StreamConsumer,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Received empty payload")]
    Empty,
}

impl BatchConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set("enable.auto.commit", "false");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka consumer configuration: {:?}", client_config);
        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;
        info!(
            topic = consumer_config.kafka_consumer_topic,
            group = consumer_config.kafka_consumer_group,
            "subscribed to topic"
        );

        Ok(Self { consumer })
    }

    async fn recv(&self) -> Result<Vec<u8>, RecvErr> {
        let message = self.consumer.recv().await?;

        match message.payload() {
            Some(payload) => Ok(payload.to_vec()),
            None => Err(RecvErr::Empty),
        }
    }

    /// Receive up to `max` payloads, returning early when `timeout` elapses.
    /// Stops at the first error, which is returned as the last element.
    pub async fn recv_batch(&self, max: usize, timeout: Duration) -> Vec<Result<Vec<u8>, RecvErr>> {
        let mut results = Vec::with_capacity(max);

        tokio::select! {
            _ = tokio::time::sleep(timeout) => {},
            _ = async {
                while results.len() < max {
                    let result = self.recv().await;
                    let was_err = result.is_err();
                    results.push(result);
                    if was_err {
                        break;
                    }
                }
            } => {}
        }

        results
    }

    /// Commit the current position of every assigned partition, blocking until
    /// the broker acknowledges.
    pub fn commit_sync(&self) -> Result<(), KafkaError> {
        self.consumer.commit_consumer_state(CommitMode::Sync)
    }
}
