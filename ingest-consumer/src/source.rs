use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use common_kafka::kafka_consumer::{BatchConsumer, RecvErr};
use rdkafka::error::KafkaError;

pub type Batch = Vec<Result<Vec<u8>, RecvErr>>;

/// A partitioned log read in bounded batches, with explicit offset commits.
#[async_trait]
pub trait BatchSource {
    async fn recv_batch(&self, max: usize, timeout: Duration) -> Batch;

    async fn commit(&self) -> Result<(), KafkaError>;
}

#[async_trait]
impl BatchSource for BatchConsumer {
    async fn recv_batch(&self, max: usize, timeout: Duration) -> Batch {
        BatchConsumer::recv_batch(self, max, timeout).await
    }

    async fn commit(&self) -> Result<(), KafkaError> {
        self.commit_sync()
    }
}

/// Serves pre-loaded batches, one per poll, then empty ones.
#[derive(Default)]
pub struct MemorySource {
    batches: Mutex<VecDeque<Batch>>,
    polls: AtomicUsize,
    commits: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(self, messages: Vec<Vec<u8>>) -> Self {
        self.push_batch(messages.into_iter().map(Ok).collect());
        self
    }

    pub fn push_batch(&self, batch: Batch) {
        lock(&self.batches).push_back(batch);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        lock(&self.batches).len()
    }
}

#[async_trait]
impl BatchSource for MemorySource {
    async fn recv_batch(&self, max: usize, _timeout: Duration) -> Batch {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut batch = lock(&self.batches).pop_front().unwrap_or_default();
        batch.truncate(max);
        batch
    }

    async fn commit(&self) -> Result<(), KafkaError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
