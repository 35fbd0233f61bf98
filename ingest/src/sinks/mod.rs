use async_trait::async_trait;

use crate::api::IngestError;
use crate::event::GroupedEvent;

pub mod kafka;
pub mod memory;
pub mod print;

/// Where grouped events go once accepted. Storage itself lives elsewhere.
#[async_trait]
pub trait EventSink {
    async fn send(&self, event: GroupedEvent) -> Result<(), IngestError>;
}
