use std::future::Future;
use std::sync::Arc;

use common_kafka::kafka_producer::create_kafka_producer;
use common_redis::RedisClient;
use tokio::net::TcpListener;

use crate::auth::Authenticator;
use crate::config::{optional_timeout, Config};
use crate::credentials::{
    CredentialStore, MemoryCredentialStore, RedisCredentialStore, TenantCredential,
};
use crate::router;
use crate::sinks::kafka::KafkaSink;
use crate::sinks::print::PrintSink;
use crate::time::SystemTime;

async fn create_credential_store(
    config: &Config,
) -> anyhow::Result<Arc<dyn CredentialStore + Send + Sync>> {
    if let Some(credentials) = &config.credentials {
        let store: MemoryCredentialStore = credentials.parse()?;
        tracing::info!(count = store.len(), "using static credentials");
        return Ok(Arc::new(store));
    }

    let redis = RedisClient::with_config(
        config.redis_url.clone(),
        optional_timeout(config.redis_response_timeout_ms),
        optional_timeout(config.redis_connection_timeout_ms),
    )
    .await?;
    Ok(Arc::new(RedisCredentialStore::new(Arc::new(redis))))
}

pub fn create_authenticator(
    config: &Config,
    credentials: Arc<dyn CredentialStore + Send + Sync>,
) -> Authenticator {
    let authenticator =
        Authenticator::new(credentials).with_replay_window(config.replay_window());

    match &config.default_secret {
        Some(secret) => authenticator.with_default_credential(TenantCredential {
            public_key: String::new(),
            secret_key: secret.clone(),
            tenant_id: config.default_tenant_id,
        }),
        None => authenticator,
    }
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let credentials = create_credential_store(&config).await?;
    let authenticator = create_authenticator(&config, credentials);

    let app = if config.print_sink {
        router::router(
            SystemTime {},
            authenticator,
            PrintSink {},
            config.export_prometheus,
            config.max_body_size,
        )
    } else {
        let producer = create_kafka_producer(&config.kafka).await?;
        router::router(
            SystemTime {},
            authenticator,
            KafkaSink::new(producer, config.kafka_events_topic.clone()),
            config.export_prometheus,
            config.max_body_size,
        )
    };

    tracing::info!("listening on {:?}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
