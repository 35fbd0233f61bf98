use std::sync::Arc;
use std::time::{Duration, Instant};

use common_redis::{Client, CustomRedisError};
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::ConsumerError;
use crate::message::RawIngestMessage;
use crate::retry::RetryPolicy;
use crate::scheduler::{Scheduler, StagedEventTask};
use crate::source::BatchSource;

pub const MESSAGES_TOTAL: &str = "consumer_messages_total";
pub const DUPLICATES_TOTAL: &str = "consumer_duplicates_total";
pub const BATCH_DURATION: &str = "consumer_batch_duration_seconds";
pub const BATCH_SIZE: &str = "consumer_batch_size";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Consuming,
    Processing,
    Committing,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub marker_ttl: Duration,
    pub staged_ttl: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout: Duration::from_secs(1),
            marker_ttl: Duration::from_secs(3600),
            staged_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Scheduled,
    Duplicate,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub polled: usize,
    pub scheduled: usize,
    pub duplicates: usize,
    pub committed: bool,
}

/// Moves raw events from the ingest topic to the processing queue, at most
/// once per `(project_id, event_id)` within the marker TTL.
///
/// Each cycle polls a batch, stages and schedules every event not seen before,
/// then commits. Any error abandons the batch without committing, so a restart
/// replays it; events already scheduled are then skipped through their marker.
pub struct IngestConsumer {
    source: Arc<dyn BatchSource + Send + Sync>,
    cache: Arc<dyn Client + Send + Sync>,
    scheduler: Arc<dyn Scheduler + Send + Sync>,
    settings: ConsumerSettings,
    retry_policy: RetryPolicy,
    state: ConsumerState,
}

impl IngestConsumer {
    pub fn new(
        source: Arc<dyn BatchSource + Send + Sync>,
        cache: Arc<dyn Client + Send + Sync>,
        scheduler: Arc<dyn Scheduler + Send + Sync>,
        settings: ConsumerSettings,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            source,
            cache,
            scheduler,
            settings,
            retry_policy,
            state: ConsumerState::Idle,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Run cycles until `shutdown` is cancelled. Cancellation is only observed
    /// between cycles, a batch in flight always runs to its commit.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        info!(
            batch_size = self.settings.batch_size,
            max_attempts = self.retry_policy.max_attempts(),
            "starting ingest consumer"
        );
        loop {
            if shutdown.is_cancelled() {
                info!("shutdown requested, stopping ingest consumer");
                return Ok(());
            }
            self.run_once().await?;
        }
    }

    /// One consume-process-commit cycle.
    #[instrument(skip_all)]
    pub async fn run_once(&mut self) -> Result<BatchOutcome, ConsumerError> {
        let started = Instant::now();

        self.state = ConsumerState::Consuming;
        let batch = self
            .source
            .recv_batch(self.settings.batch_size, self.settings.batch_timeout)
            .await;

        self.state = ConsumerState::Processing;
        let mut outcome = BatchOutcome {
            polled: batch.len(),
            ..Default::default()
        };
        for message in batch {
            let payload = message?;
            counter!(MESSAGES_TOTAL).increment(1);
            match self.process_message(&payload).await? {
                MessageOutcome::Scheduled => outcome.scheduled += 1,
                MessageOutcome::Duplicate => outcome.duplicates += 1,
            }
        }

        if outcome.polled > 0 {
            self.state = ConsumerState::Committing;
            self.source.commit().await.map_err(ConsumerError::Commit)?;
            outcome.committed = true;
            histogram!(BATCH_SIZE).record(outcome.polled as f64);
            histogram!(BATCH_DURATION).record(started.elapsed().as_secs_f64());
            debug!(
                polled = outcome.polled,
                scheduled = outcome.scheduled,
                duplicates = outcome.duplicates,
                "committed batch"
            );
        }

        self.state = ConsumerState::Idle;
        Ok(outcome)
    }

    #[instrument(skip_all, fields(event_id, project_id))]
    async fn process_message(&self, raw: &[u8]) -> Result<MessageOutcome, ConsumerError> {
        let message = RawIngestMessage::unpack(raw)?;
        tracing::Span::current()
            .record("event_id", message.event_id.as_str())
            .record("project_id", message.project_id);

        let dedup_key = message.dedup_key();
        let seen = self
            .retry_policy
            .run_when("dedup_check", is_transient, || {
                self.cache.exists(dedup_key.clone())
            })
            .await?;
        if seen {
            warn!(
                event_id = %message.event_id,
                project_id = message.project_id,
                "skipping already processed event"
            );
            counter!(DUPLICATES_TOTAL).increment(1);
            return Ok(MessageOutcome::Duplicate);
        }

        let cache_key = message.staged_key();
        let staged_ttl = self.settings.staged_ttl.as_secs();
        self.retry_policy
            .run_when("stage_payload", is_transient, || {
                self.cache
                    .set_raw_bytes_ex(cache_key.clone(), message.payload.clone(), staged_ttl)
            })
            .await?;

        let task = StagedEventTask {
            cache_key,
            start_time: message.start_time,
            event_id: message.event_id.clone(),
            project_id: message.project_id,
        };
        self.retry_policy
            .run("schedule", || self.scheduler.schedule(&task))
            .await?;

        // Only once the task exists: a crash before this point means a replay
        // schedules the event again instead of losing it.
        let marker_ttl = self.settings.marker_ttl.as_secs();
        self.retry_policy
            .run_when("write_marker", is_transient, || {
                self.cache
                    .set_raw_bytes_ex(dedup_key.clone(), Vec::new(), marker_ttl)
            })
            .await?;

        Ok(MessageOutcome::Scheduled)
    }
}

fn is_transient(err: &CustomRedisError) -> bool {
    !err.is_unrecoverable_error()
}
