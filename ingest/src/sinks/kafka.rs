use async_trait::async_trait;
use common_kafka::kafka_producer::{send_keyed_json, KafkaContext, KafkaProduceError};
use metrics::counter;
use rdkafka::producer::FutureProducer;
use tracing::{error, instrument};

use crate::api::IngestError;
use crate::event::GroupedEvent;
use crate::prometheus::{report_dropped_events, EVENTS_INGESTED_TOTAL};
use crate::sinks::EventSink;

/// Ships grouped events to the event store topic, keyed by `project_id:event_id`.
#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaSink {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl EventSink for KafkaSink {
    #[instrument(skip_all, fields(event_id = %event.event_id))]
    async fn send(&self, event: GroupedEvent) -> Result<(), IngestError> {
        let key = event.key();
        match send_keyed_json(&self.producer, &self.topic, Some(&key), &event).await {
            Ok(()) => {
                counter!(EVENTS_INGESTED_TOTAL).increment(1);
                Ok(())
            }
            Err(KafkaProduceError::MessageTooLarge) => {
                report_dropped_events("kafka_message_size", 1);
                Err(IngestError::EventTooBig)
            }
            Err(KafkaProduceError::SerializationError { error }) => {
                error!("failed to serialize event: {}", error);
                Err(IngestError::NonRetryableSinkError)
            }
            Err(err) => {
                counter!("ingest_kafka_produce_errors_total").increment(1);
                error!("failed to produce to Kafka: {}", err);
                Err(IngestError::RetryableSinkError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_kafka::test::create_mock_kafka;
    use grouping::GroupingReason;
    use rdkafka::types::{RDKafkaApiKey, RDKafkaRespErr};

    fn event() -> GroupedEvent {
        GroupedEvent {
            event_id: "fc6d8c0c43fc4630ad850ee518f1b9d0".to_string(),
            project_id: 42,
            platform: "python".to_string(),
            hashes: vec!["d41d8cd98f00b204e9800998ecf8427e".to_string()],
            grouping_reason: GroupingReason::Message,
            data: "{}".to_string(),
            received_at: "2023-11-14T22:13:20Z".to_string(),
        }
    }

    #[tokio::test]
    async fn kafka_sink_error_handling() {
        let (cluster, producer) = create_mock_kafka().await;
        let sink = KafkaSink::new(producer, "grouped_events".to_string());

        // Wait for the producer to be ready
        for _ in 0..20 {
            if sink.send(event()).await.is_ok() {
                break;
            }
        }
        sink.send(event()).await.expect("failed to send event");

        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_MSG_SIZE_TOO_LARGE; 1];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        match sink.send(event()).await {
            Err(IngestError::EventTooBig) => {}
            Err(err) => panic!("wrong error code {}", err),
            Ok(()) => panic!("should have errored"),
        };
        cluster.clear_request_errors(RDKafkaApiKey::Produce);

        sink.send(event()).await.expect("failed to send event");
    }
}
