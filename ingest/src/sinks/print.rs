use async_trait::async_trait;
use metrics::counter;
use tracing::info;

use crate::api::IngestError;
use crate::event::GroupedEvent;
use crate::prometheus::EVENTS_INGESTED_TOTAL;
use crate::sinks::EventSink;

pub struct PrintSink {}

#[async_trait]
impl EventSink for PrintSink {
    async fn send(&self, event: GroupedEvent) -> Result<(), IngestError> {
        info!("grouped event: {:?}", event);
        counter!(EVENTS_INGESTED_TOTAL).increment(1);

        Ok(())
    }
}
