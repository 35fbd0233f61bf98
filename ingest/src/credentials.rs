use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common_redis::{Client, CustomRedisError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

pub const CREDENTIAL_KEY_PREFIX: &str = "ingest:credential:";

/// A project key pair. The secret never leaves this process: it is redacted from
/// `Debug` output and never serialized back out by the ingestion path.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCredential {
    pub public_key: String,
    pub secret_key: String,
    pub tenant_id: i64,
}

impl fmt::Debug for TenantCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantCredential")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("credential store unavailable: {0}")]
    Unavailable(#[from] CustomRedisError),
    #[error("stored credential could not be parsed: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[async_trait]
pub trait CredentialStore {
    async fn lookup_by_public_key(
        &self,
        public_key: &str,
    ) -> Result<Option<TenantCredential>, CredentialError>;
}

/// Credentials stored as JSON documents under `ingest:credential:{public_key}`.
pub struct RedisCredentialStore {
    client: Arc<dyn Client + Send + Sync>,
}

impl RedisCredentialStore {
    pub fn new(client: Arc<dyn Client + Send + Sync>) -> Self {
        Self { client }
    }

    pub fn key_for(public_key: &str) -> String {
        format!("{CREDENTIAL_KEY_PREFIX}{public_key}")
    }
}

#[async_trait]
impl CredentialStore for RedisCredentialStore {
    async fn lookup_by_public_key(
        &self,
        public_key: &str,
    ) -> Result<Option<TenantCredential>, CredentialError> {
        let raw = match self.client.get(Self::key_for(public_key)).await {
            Ok(raw) => raw,
            Err(CustomRedisError::NotFound) => return Ok(None),
            Err(err) => {
                error!(public_key, "failed to read credential: {}", err);
                return Err(err.into());
            }
        };

        let credential: TenantCredential = serde_json::from_str(&raw).map_err(|err| {
            error!(public_key, "stored credential is malformed: {}", err);
            err
        })?;
        Ok(Some(credential))
    }
}

/// Static credentials, for tests and deployments with a fixed set of projects.
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    credentials: Arc<RwLock<HashMap<String, TenantCredential>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(self, credential: TenantCredential) -> Self {
        self.insert(credential);
        self
    }

    pub fn insert(&self, credential: TenantCredential) {
        let mut credentials = match self.credentials.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        credentials.insert(credential.public_key.clone(), credential);
    }

    pub fn len(&self) -> usize {
        match self.credentials.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid credential entry {0:?}, expected <public_key>:<secret_key>:<tenant_id>")]
pub struct ParseCredentialsError(String);

/// Parses `"<public_key>:<secret_key>:<tenant_id>;..."`.
impl FromStr for MemoryCredentialStore {
    type Err = ParseCredentialsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let store = MemoryCredentialStore::new();
        for entry in s.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            let (Some(public_key), Some(secret_key), Some(tenant_id)) =
                (parts.next(), parts.next(), parts.next())
            else {
                return Err(ParseCredentialsError(entry.to_string()));
            };
            let tenant_id = tenant_id
                .trim()
                .parse::<i64>()
                .map_err(|_| ParseCredentialsError(entry.to_string()))?;
            if public_key.is_empty() || secret_key.is_empty() {
                return Err(ParseCredentialsError(entry.to_string()));
            }
            store.insert(TenantCredential {
                public_key: public_key.to_string(),
                secret_key: secret_key.to_string(),
                tenant_id,
            });
        }
        Ok(store)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn lookup_by_public_key(
        &self,
        public_key: &str,
    ) -> Result<Option<TenantCredential>, CredentialError> {
        let credentials = match self.credentials.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(credentials.get(public_key).cloned())
    }
}
