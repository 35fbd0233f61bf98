use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::api::IngestError;
use crate::event::GroupedEvent;
use crate::sinks::EventSink;

/// Keeps every event it receives; clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<GroupedEvent>>>,
}

impl MemorySink {
    fn lock(&self) -> MutexGuard<'_, Vec<GroupedEvent>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn events(&self) -> Vec<GroupedEvent> {
        self.lock().clone()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn send(&self, event: GroupedEvent) -> Result<(), IngestError> {
        self.lock().push(event);
        Ok(())
    }
}
