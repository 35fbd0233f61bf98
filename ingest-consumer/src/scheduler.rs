use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use common_kafka::kafka_producer::{send_keyed_json, KafkaContext, KafkaProduceError};
use rdkafka::producer::FutureProducer;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

/// The unit of work handed to the downstream processor: where the staged
/// payload lives and when the event was first seen by the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedEventTask {
    pub cache_key: String,
    pub start_time: f64,
    pub event_id: String,
    pub project_id: i64,
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Kafka(#[from] KafkaProduceError),
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Scheduler {
    async fn schedule(&self, task: &StagedEventTask) -> Result<(), SchedulerError>;
}

/// Produces tasks as JSON onto the task topic, keyed by event id so that a
/// redelivered event lands on the same partition.
pub struct KafkaScheduler {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaScheduler {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl Scheduler for KafkaScheduler {
    #[instrument(skip_all, fields(event_id = %task.event_id))]
    async fn schedule(&self, task: &StagedEventTask) -> Result<(), SchedulerError> {
        send_keyed_json(&self.producer, &self.topic, Some(&task.event_id), task).await?;
        Ok(())
    }
}

/// Records tasks in memory. Can be told to fail a number of times first.
#[derive(Clone, Default)]
pub struct MemoryScheduler {
    tasks: Arc<Mutex<Vec<StagedEventTask>>>,
    failures: Arc<Mutex<u32>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryScheduler {
    pub fn failing(times: u32) -> Self {
        let scheduler = Self::default();
        *lock(&scheduler.failures) = times;
        scheduler
    }

    pub fn tasks(&self) -> Vec<StagedEventTask> {
        lock(&self.tasks).clone()
    }
}

#[async_trait]
impl Scheduler for MemoryScheduler {
    async fn schedule(&self, task: &StagedEventTask) -> Result<(), SchedulerError> {
        {
            let mut failures = lock(&self.failures);
            if *failures > 0 {
                *failures -= 1;
                return Err(SchedulerError::Unavailable("injected failure".to_string()));
            }
        }
        lock(&self.tasks).push(task.clone());
        Ok(())
    }
}
