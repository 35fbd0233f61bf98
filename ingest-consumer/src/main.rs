//! Consume the ingest topic, or the task topic when `MODE=tasks`.
use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use common_kafka::kafka_consumer::BatchConsumer;
use common_kafka::kafka_producer::create_kafka_producer;
use common_redis::{Client, RedisClient};
use envconfig::Envconfig;
use ingest::config::optional_timeout;
use ingest::prometheus::{setup_metrics_recorder, track_metrics};
use ingest::sinks::kafka::KafkaSink;
use ingest::sinks::print::PrintSink;
use ingest::sinks::EventSink;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ingest_consumer::config::{Config, ConsumerMode};
use ingest_consumer::consumer::IngestConsumer;
use ingest_consumer::scheduler::{KafkaScheduler, Scheduler};
use ingest_consumer::task::TaskWorker;

async fn index() -> &'static str {
    "ingest consumer"
}

async fn serve_metrics(bind: String) -> anyhow::Result<()> {
    let recorder = setup_metrics_recorder()?;
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(index))
        .route("/metrics", get(move || ready(recorder.render())))
        .layer(axum::middleware::from_fn(track_metrics));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// Cancel `token` on SIGTERM or SIGINT.
fn cancel_on_signal(token: CancellationToken) -> anyhow::Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = term.recv() => {},
            _ = interrupt.recv() => {},
        };
        info!("Shutting down gracefully...");
        token.cancel();
    });
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::init_from_env()?;

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone())?;

    let bind = config.bind();
    tokio::spawn(async move {
        if let Err(err) = serve_metrics(bind).await {
            error!("failed to serve metrics: {}", err);
        }
    });

    let cache: Arc<dyn Client + Send + Sync> = Arc::new(
        RedisClient::with_config(
            config.redis_url.clone(),
            optional_timeout(config.redis_response_timeout_ms),
            optional_timeout(config.redis_connection_timeout_ms),
        )
        .await?,
    );
    let consumer_config = config.consumer_config();
    let mut workers = JoinSet::new();

    match config.mode {
        ConsumerMode::Ingest => {
            let producer = create_kafka_producer(&config.kafka).await?;
            let scheduler: Arc<dyn Scheduler + Send + Sync> = Arc::new(KafkaScheduler::new(
                producer,
                config.kafka_task_topic.clone(),
            ));
            for _ in 0..config.worker_count {
                let source = Arc::new(BatchConsumer::new(&config.kafka, &consumer_config)?);
                let mut consumer = IngestConsumer::new(
                    source,
                    cache.clone(),
                    scheduler.clone(),
                    config.settings(),
                    config.retry_policy.policy(),
                );
                let shutdown = shutdown.clone();
                workers.spawn(async move {
                    consumer.run(shutdown).await.map_err(anyhow::Error::from)
                });
            }
        }
        ConsumerMode::Tasks => {
            let sink: Arc<dyn EventSink + Send + Sync> = if config.print_sink {
                Arc::new(PrintSink {})
            } else {
                let producer = create_kafka_producer(&config.kafka).await?;
                Arc::new(KafkaSink::new(producer, config.kafka_events_topic.clone()))
            };
            for _ in 0..config.worker_count {
                let source = Arc::new(BatchConsumer::new(&config.kafka, &consumer_config)?);
                let worker = TaskWorker::new(
                    source,
                    cache.clone(),
                    sink.clone(),
                    config.batch_size,
                    config.batch_timeout.0,
                    config.retry_policy.policy(),
                );
                let shutdown = shutdown.clone();
                workers.spawn(async move {
                    worker.run(shutdown).await.map_err(anyhow::Error::from)
                });
            }
        }
    }

    info!(mode = ?config.mode, workers = config.worker_count, "consumer started");

    let failure = drain_workers(&mut workers, &shutdown).await;
    info!("all workers stopped");
    failure.map_or(Ok(()), Err)
}

/// Wait for every worker. The first failure cancels the others, which finish
/// their current batch before stopping; it is returned once all have exited.
/// Uncommitted batches are replayed by whoever picks up the partitions.
async fn drain_workers(
    workers: &mut JoinSet<anyhow::Result<()>>,
    shutdown: &CancellationToken,
) -> Option<anyhow::Error> {
    let mut failure = None;
    while let Some(joined) = workers.join_next().await {
        let result = joined.map_err(anyhow::Error::from).and_then(|result| result);
        if let Err(err) = result {
            error!("worker failed: {}", err);
            shutdown.cancel();
            failure.get_or_insert(err);
        }
    }
    failure
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_failing_worker_lets_the_others_finish() {
        let shutdown = CancellationToken::new();
        let finished = CancellationToken::new();
        let mut workers = JoinSet::new();

        let token = shutdown.clone();
        let done = finished.clone();
        workers.spawn(async move {
            token.cancelled().await;
            // Still mid-batch when the failure is noticed
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            done.cancel();
            Ok(())
        });
        workers.spawn(async { Err(anyhow::anyhow!("cache unavailable")) });

        let failure = drain_workers(&mut workers, &shutdown).await;
        assert_eq!(
            failure.map(|err| err.to_string()),
            Some("cache unavailable".to_string())
        );
        assert!(shutdown.is_cancelled());
        assert!(finished.is_cancelled());
    }
}
