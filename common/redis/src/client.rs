use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

use crate::{Client, CustomRedisError};

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// Connect without timeouts: commands block until the server answers.
    pub async fn new(addr: String) -> Result<RedisClient, CustomRedisError> {
        Self::with_config(addr, None, None).await
    }

    /// Connect with optional response and connection timeouts. A zero timeout
    /// is rejected with `InvalidConfiguration`, pass `None` to disable one.
    pub async fn with_config(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = non_zero("response", response_timeout)? {
            config = config.set_response_timeout(timeout);
        }
        if let Some(timeout) = non_zero("connection", connection_timeout)? {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;
        Ok(RedisClient { connection })
    }
}

fn non_zero(
    which: &str,
    timeout: Option<Duration>,
) -> Result<Option<Duration>, CustomRedisError> {
    match timeout {
        Some(t) if t.is_zero() => Err(CustomRedisError::InvalidConfiguration(format!(
            "redis {which} timeout cannot be zero, use None to disable it"
        ))),
        other => Ok(other),
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let raw = self.get_raw_bytes(k).await?;
        Ok(String::from_utf8(raw)?)
    }

    async fn get_raw_bytes(&self, k: String) -> Result<Vec<u8>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let raw_bytes: Option<Vec<u8>> = conn.get(k).await?;

        match raw_bytes {
            Some(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => Err(CustomRedisError::NotFound),
        }
    }

    async fn set_raw_bytes_ex(
        &self,
        k: String,
        v: Vec<u8>,
        seconds: u64,
    ) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(k, v, seconds).await?;
        Ok(())
    }

    async fn exists(&self, k: String) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let found: bool = conn.exists(k).await?;
        Ok(found)
    }
}
