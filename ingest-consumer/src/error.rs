use common_kafka::kafka_consumer::RecvErr;
use common_redis::CustomRedisError;
use ingest::api::IngestError;
use ingest::payload::DecodeError;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::scheduler::SchedulerError;

/// Errors that abort a consume-process-commit cycle. None of them commit, so
/// the whole batch is redelivered after a restart.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("failed to receive from the ingest topic: {0}")]
    Transport(#[from] RecvErr),
    #[error("malformed ingest message: {0}")]
    MalformedMessage(#[from] rmp_serde::decode::Error),
    #[error("cache operation failed: {0}")]
    Cache(#[from] CustomRedisError),
    #[error("failed to schedule processing: {0}")]
    Schedule(#[from] SchedulerError),
    #[error("failed to commit offsets: {0}")]
    Commit(KafkaError),
}

/// Errors raised while processing one staged event downstream.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("malformed task: {0}")]
    MalformedTask(#[from] serde_json::Error),
    #[error("failed to read staged payload: {0}")]
    Cache(#[from] CustomRedisError),
    #[error("staged payload could not be decoded: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to store grouped event: {0}")]
    Sink(#[from] IngestError),
    #[error("failed to receive from the task topic: {0}")]
    Transport(#[from] RecvErr),
    #[error("failed to commit offsets: {0}")]
    Commit(KafkaError),
}

impl TaskError {
    /// Failures that may clear up on their own: cache outages and transient
    /// sink errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Cache(err) => !err.is_unrecoverable_error(),
            TaskError::Sink(err) => err.is_retryable(),
            _ => false,
        }
    }
}
