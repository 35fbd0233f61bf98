use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Client, CustomRedisError};

/// In-memory stand-in for redis. Writes land in a shared map so that a value set
/// through one clone is visible through the others; canned errors registered per
/// key take precedence over the stored state.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    get_err: HashMap<String, CustomRedisError>,
    set_err: HashMap<String, CustomRedisError>,
    exists_err: HashMap<String, CustomRedisError>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockRedisValue {
    None,
    Bytes(Vec<u8>),
    BytesWithTTL(Vec<u8>, u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value, as if a previous process had written it.
    pub fn with_value(self, key: &str, value: impl Into<Vec<u8>>) -> Self {
        lock(&self.store).insert(key.to_owned(), value.into());
        self
    }

    pub fn get_err(mut self, key: &str, err: CustomRedisError) -> Self {
        self.get_err.insert(key.to_owned(), err);
        self
    }

    pub fn set_err(mut self, key: &str, err: CustomRedisError) -> Self {
        self.set_err.insert(key.to_owned(), err);
        self
    }

    pub fn exists_err(mut self, key: &str, err: CustomRedisError) -> Self {
        self.exists_err.insert(key.to_owned(), err);
        self
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, op: &str) -> Vec<MockRedisCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    pub fn stored(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.store).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.store).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, op: &str, key: &str, value: MockRedisValue) {
        lock(&self.calls).push(MockRedisCall {
            op: op.to_string(),
            key: key.to_string(),
            value,
        });
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let raw = self.get_raw_bytes(k).await?;
        Ok(String::from_utf8(raw)?)
    }

    async fn get_raw_bytes(&self, k: String) -> Result<Vec<u8>, CustomRedisError> {
        self.record("get", &k, MockRedisValue::None);

        if let Some(err) = self.get_err.get(&k) {
            return Err(err.clone());
        }
        match lock(&self.store).get(&k) {
            Some(bytes) if !bytes.is_empty() => Ok(bytes.clone()),
            _ => Err(CustomRedisError::NotFound),
        }
    }

    async fn set_raw_bytes_ex(
        &self,
        k: String,
        v: Vec<u8>,
        seconds: u64,
    ) -> Result<(), CustomRedisError> {
        self.record("setex", &k, MockRedisValue::BytesWithTTL(v.clone(), seconds));

        if let Some(err) = self.set_err.get(&k) {
            return Err(err.clone());
        }
        lock(&self.store).insert(k, v);
        Ok(())
    }

    async fn exists(&self, k: String) -> Result<bool, CustomRedisError> {
        self.record("exists", &k, MockRedisValue::None);

        if let Some(err) = self.exists_err.get(&k) {
            return Err(err.clone());
        }
        Ok(lock(&self.store).contains_key(&k))
    }
}
