//! In-process brokers for exercising producers without a real cluster.
use rdkafka::mocking::MockCluster;
use rdkafka::producer::{DefaultProducerContext, FutureProducer};

use crate::config::KafkaConfig;
use crate::kafka_producer::{create_kafka_producer, KafkaContext};

pub type TestCluster = MockCluster<'static, DefaultProducerContext>;

/// Settings pointing at `cluster`, tuned so deliveries resolve quickly.
pub fn mock_kafka_config(cluster: &TestCluster) -> KafkaConfig {
    KafkaConfig {
        kafka_hosts: cluster.bootstrap_servers(),
        kafka_tls: false,
        kafka_producer_linger_ms: 0,
        kafka_producer_queue_mib: 50,
        kafka_message_timeout_ms: 5000,
        kafka_compression_codec: "none".to_string(),
    }
}

/// A single broker mock and a producer connected to it. Keep the cluster
/// alive for as long as the producer is used.
pub async fn create_mock_kafka() -> (TestCluster, FutureProducer<KafkaContext>) {
    let cluster = MockCluster::new(1).expect("mock broker should start");
    let producer = create_kafka_producer(&mock_kafka_config(&cluster))
        .await
        .expect("producer should connect to the mock broker");
    (cluster, producer)
}
