use std::sync::Arc;
use std::time::Duration;

use common_redis::{Client, CustomRedisError};
use ingest::event::GroupedEvent;
use ingest::payload;
use ingest::prometheus::report_dropped_events;
use ingest::sinks::EventSink;
use ingest::time::format_unix;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::TaskError;
use crate::retry::RetryPolicy;
use crate::scheduler::StagedEventTask;
use crate::source::BatchSource;

pub const TASKS_PROCESSED_TOTAL: &str = "consumer_tasks_processed_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Stored,
    Expired,
}

/// Turn a staged payload into a grouped event and hand it to the sink.
///
/// The event keeps the id it was deduplicated under, whatever the payload
/// claims. A staged entry that has already expired is dropped.
#[instrument(skip_all, fields(event_id = %task.event_id, project_id = task.project_id))]
pub async fn process_staged_event(
    cache: &(dyn Client + Send + Sync),
    sink: &(dyn EventSink + Send + Sync),
    task: &StagedEventTask,
) -> Result<TaskOutcome, TaskError> {
    let raw = match cache.get_raw_bytes(task.cache_key.clone()).await {
        Ok(raw) => raw,
        Err(CustomRedisError::NotFound) => {
            warn!(cache_key = %task.cache_key, "staged payload expired, dropping event");
            report_dropped_events("staged_payload_expired", 1);
            return Ok(TaskOutcome::Expired);
        }
        Err(err) => return Err(err.into()),
    };

    let payload = payload::decode(&raw)?;
    let mut event =
        GroupedEvent::from_payload(task.project_id, payload, format_unix(task.start_time))?;
    event.event_id.clone_from(&task.event_id);

    sink.send(event).await?;
    counter!(TASKS_PROCESSED_TOTAL).increment(1);
    Ok(TaskOutcome::Stored)
}

/// Consumes the task topic and runs `process_staged_event` for every task,
/// committing after each batch.
pub struct TaskWorker {
    source: Arc<dyn BatchSource + Send + Sync>,
    cache: Arc<dyn Client + Send + Sync>,
    sink: Arc<dyn EventSink + Send + Sync>,
    batch_size: usize,
    batch_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl TaskWorker {
    pub fn new(
        source: Arc<dyn BatchSource + Send + Sync>,
        cache: Arc<dyn Client + Send + Sync>,
        sink: Arc<dyn EventSink + Send + Sync>,
        batch_size: usize,
        batch_timeout: Duration,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            source,
            cache,
            sink,
            batch_size,
            batch_timeout,
            retry_policy,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), TaskError> {
        info!(batch_size = self.batch_size, "starting task worker");
        loop {
            if shutdown.is_cancelled() {
                info!("shutdown requested, stopping task worker");
                return Ok(());
            }
            self.run_once().await?;
        }
    }

    /// One poll-process-commit cycle, returning how many tasks were polled.
    ///
    /// Malformed tasks, undecodable payloads and events the sink rejects for
    /// good are dropped. Cache outages and transient sink failures abort the
    /// batch once retries run out.
    pub async fn run_once(&self) -> Result<usize, TaskError> {
        let batch = self
            .source
            .recv_batch(self.batch_size, self.batch_timeout)
            .await;
        let polled = batch.len();

        for message in batch {
            let task: StagedEventTask = match serde_json::from_slice(&message?) {
                Ok(task) => task,
                Err(err) => {
                    error!("dropping malformed task: {}", err);
                    report_dropped_events("malformed_task", 1);
                    continue;
                }
            };
            let result = self
                .retry_policy
                .run_when("process_staged_event", TaskError::is_retryable, || {
                    process_staged_event(self.cache.as_ref(), self.sink.as_ref(), &task)
                })
                .await;

            match result {
                Ok(_) => {}
                Err(TaskError::Decode(err)) => {
                    error!(event_id = %task.event_id, "dropping undecodable event: {}", err);
                    report_dropped_events("undecodable_payload", 1);
                }
                Err(TaskError::Sink(err)) if !err.is_retryable() => {
                    error!(event_id = %task.event_id, "dropping rejected event: {}", err);
                    report_dropped_events("rejected_event", 1);
                }
                Err(err) => return Err(err),
            }
        }

        if polled > 0 {
            self.source.commit().await.map_err(TaskError::Commit)?;
        }
        Ok(polled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use common_redis::MockRedisClient;
    use ingest::api::IngestError;
    use ingest::sinks::memory::MemorySink;
    use serde_json::json;

    use crate::source::MemorySource;

    const EVENT_ID: &str = "fc6d8c0c43fc4630ad850ee518f1b9d0";

    fn task() -> StagedEventTask {
        StagedEventTask {
            cache_key: format!("ingest:staged:7:{EVENT_ID}"),
            start_time: 1_700_000_000.0,
            event_id: EVENT_ID.to_string(),
            project_id: 7,
        }
    }

    #[tokio::test]
    async fn groups_staged_payloads() {
        let body = json!({"event_id": "00000000000000000000000000000002", "message": "boom"});
        let cache = MockRedisClient::new().with_value(&task().cache_key, body.to_string());
        let sink = MemorySink::default();

        let outcome = process_staged_event(&cache, &sink, &task()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Stored);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, EVENT_ID);
        assert_eq!(events[0].project_id, 7);
        assert_eq!(events[0].received_at, "2023-11-14T22:13:20Z");
        assert_eq!(events[0].hashes.len(), 1);
    }

    #[tokio::test]
    async fn expired_payloads_are_dropped() {
        let sink = MemorySink::default();
        let outcome = process_staged_event(&MockRedisClient::new(), &sink, &task())
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Expired);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn worker_drops_undecodable_payloads_and_commits() {
        let cache = MockRedisClient::new().with_value(&task().cache_key, "%%% not base64");
        let sink = MemorySink::default();
        let source = Arc::new(
            MemorySource::new().with_batch(vec![serde_json::to_vec(&task()).unwrap()]),
        );
        let worker = TaskWorker::new(
            source.clone(),
            Arc::new(cache),
            Arc::new(sink.clone()),
            10,
            Duration::from_millis(10),
            RetryPolicy::no_retries(),
        );

        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert!(sink.is_empty());
        assert_eq!(source.commits(), 1);
    }

    #[tokio::test]
    async fn worker_aborts_on_cache_outage() {
        let cache =
            MockRedisClient::new().get_err(&task().cache_key, CustomRedisError::Timeout);
        let source = Arc::new(
            MemorySource::new().with_batch(vec![serde_json::to_vec(&task()).unwrap()]),
        );
        let worker = TaskWorker::new(
            source.clone(),
            Arc::new(cache),
            Arc::new(MemorySink::default()),
            10,
            Duration::from_millis(10),
            RetryPolicy::no_retries(),
        );

        assert!(matches!(
            worker.run_once().await,
            Err(TaskError::Cache(CustomRedisError::Timeout))
        ));
        assert_eq!(source.commits(), 0);
    }

    /// Refuses every event for good, counting the attempts.
    #[derive(Default)]
    struct RejectingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl EventSink for RejectingSink {
        async fn send(&self, _event: GroupedEvent) -> Result<(), IngestError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(IngestError::NonRetryableSinkError)
        }
    }

    #[tokio::test]
    async fn worker_drops_rejected_events_without_retrying() {
        let body = json!({"message": "boom"});
        let cache = MockRedisClient::new().with_value(&task().cache_key, body.to_string());
        let sink = Arc::new(RejectingSink::default());
        let source = Arc::new(
            MemorySource::new().with_batch(vec![serde_json::to_vec(&task()).unwrap()]),
        );
        let worker = TaskWorker::new(
            source.clone(),
            Arc::new(cache),
            sink.clone(),
            10,
            Duration::from_millis(10),
            RetryPolicy::new(3, 2, Duration::from_millis(1), None),
        );

        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(source.commits(), 1);
    }
}
