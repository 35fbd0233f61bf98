//! Authentication of signed ingestion requests.
//!
//! Clients send `Sentry sentry_key=<public key>, sentry_signature=<hex>,
//! sentry_timestamp=<unix seconds>, sentry_client=<sdk>`. The signature is an
//! HMAC-SHA1 of `"{timestamp} {body}"` keyed with the project secret. There is
//! no nonce tracking: a captured request can be replayed until its timestamp
//! falls out of the replay window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::credentials::{CredentialError, CredentialStore, TenantCredential};

pub mod signature;

pub const AUTH_SCHEME: &str = "Sentry";
pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_secs(3600);
pub const INVALID_SIGNATURE: &str = "Invalid signature";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid auth header")]
    InvalidHeader,
    #[error("missing signature or timestamp")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("timestamp is too old, resend with a fresh timestamp")]
    TimestampExpired,
    #[error("credential store unavailable, please retry")]
    StoreUnavailable,
}

impl AuthError {
    fn invalid_signature() -> Self {
        AuthError::Forbidden(INVALID_SIGNATURE.to_string())
    }

    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::InvalidHeader => "invalid_header",
            AuthError::Unauthorized => "unauthorized",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::InvalidTimestamp => "invalid_timestamp",
            AuthError::TimestampExpired => "timestamp_expired",
            AuthError::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Split `Sentry k1=v1, k2=v2` into its pairs. Keys and values are trimmed;
/// later duplicates win.
pub fn parse_auth_header(raw: &str) -> Result<HashMap<String, String>, AuthError> {
    let (scheme, params) = raw
        .trim()
        .split_once(' ')
        .ok_or(AuthError::InvalidHeader)?;
    if !scheme.eq_ignore_ascii_case(AUTH_SCHEME) {
        return Err(AuthError::InvalidHeader);
    }

    let mut pairs = HashMap::new();
    for pair in params.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            return Err(AuthError::InvalidHeader);
        }
        let (key, value) = pair.split_once('=').ok_or(AuthError::InvalidHeader)?;
        pairs.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(pairs)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEnvelope {
    pub signature: String,
    /// Exactly as sent: the signature covers this text, not a re-rendered float.
    pub raw_timestamp: String,
    pub client_id: String,
    pub api_key_id: Option<String>,
}

impl AuthEnvelope {
    pub fn from_header(raw: &str) -> Result<Self, AuthError> {
        let mut pairs = parse_auth_header(raw)?;

        let signature = pairs
            .remove("sentry_signature")
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::Unauthorized)?;
        let raw_timestamp = pairs
            .remove("sentry_timestamp")
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Unauthorized)?;

        Ok(AuthEnvelope {
            signature,
            raw_timestamp,
            client_id: pairs.remove("sentry_client").unwrap_or_default(),
            api_key_id: pairs.remove("sentry_key").filter(|k| !k.is_empty()),
        })
    }

    pub fn timestamp(&self) -> Result<f64, AuthError> {
        self.raw_timestamp
            .parse::<f64>()
            .ok()
            .filter(|ts| ts.is_finite())
            .ok_or(AuthError::InvalidTimestamp)
    }
}

/// Resolves the tenant for a signed request. Requests without a `sentry_key`
/// fall back to the default credential, when one was configured.
pub struct Authenticator {
    credentials: Arc<dyn CredentialStore + Send + Sync>,
    default_credential: Option<TenantCredential>,
    replay_window: Duration,
}

impl Authenticator {
    pub fn new(credentials: Arc<dyn CredentialStore + Send + Sync>) -> Self {
        Self {
            credentials,
            default_credential: None,
            replay_window: DEFAULT_REPLAY_WINDOW,
        }
    }

    pub fn with_default_credential(mut self, credential: TenantCredential) -> Self {
        self.default_credential = Some(credential);
        self
    }

    pub fn with_replay_window(mut self, replay_window: Duration) -> Self {
        self.replay_window = replay_window;
        self
    }

    async fn resolve(&self, envelope: &AuthEnvelope) -> Result<TenantCredential, AuthError> {
        let Some(public_key) = &envelope.api_key_id else {
            return self
                .default_credential
                .clone()
                .ok_or_else(AuthError::invalid_signature);
        };

        match self.credentials.lookup_by_public_key(public_key).await {
            Ok(Some(credential)) => Ok(credential),
            Ok(None) => {
                error!(public_key, "unknown public key");
                Err(AuthError::invalid_signature())
            }
            Err(CredentialError::Unavailable(err)) => {
                warn!(public_key, "credential lookup failed: {}", err);
                Err(AuthError::StoreUnavailable)
            }
            Err(CredentialError::Malformed(err)) => {
                error!(public_key, "credential lookup failed: {}", err);
                Err(AuthError::StoreUnavailable)
            }
        }
    }

    /// Authenticate a request received at `now` (unix seconds).
    pub async fn authenticate(
        &self,
        raw_header: &str,
        body: &[u8],
        now: f64,
    ) -> Result<TenantCredential, AuthError> {
        let envelope = AuthEnvelope::from_header(raw_header)?;
        let credential = self.resolve(&envelope).await?;

        // Stale requests are rejected before spending an HMAC on them
        let timestamp = envelope.timestamp()?;
        if now - timestamp > self.replay_window.as_secs_f64() {
            debug!(
                public_key = credential.public_key,
                age = now - timestamp,
                "request timestamp outside replay window"
            );
            return Err(AuthError::TimestampExpired);
        }

        signature::verify(
            &envelope.signature,
            &envelope.raw_timestamp,
            body,
            &credential.secret_key,
        )
        .map_err(|err| {
            error!(
                public_key = credential.public_key,
                client = envelope.client_id,
                "rejected request: {}",
                err
            );
            AuthError::invalid_signature()
        })?;

        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use common_redis::{CustomRedisError, MockRedisClient};

    use crate::credentials::RedisCredentialStore;

    const NOW: f64 = 1_700_000_000.0;
    const BODY: &[u8] = br#"{"event_id":"abc"}"#;

    fn pub1() -> TenantCredential {
        TenantCredential {
            public_key: "pub1".to_string(),
            secret_key: "s3cr3t".to_string(),
            tenant_id: 42,
        }
    }

    fn authenticator() -> Authenticator {
        Authenticator::new(Arc::new(MemoryCredentialStore::new().with_credential(pub1())))
    }

    fn header(key: Option<&str>, secret: &str, timestamp: &str, body: &[u8]) -> String {
        let signature = signature::sign(secret, timestamp, body).unwrap();
        match key {
            Some(key) => format!(
                "Sentry sentry_key={key}, sentry_signature={signature}, sentry_timestamp={timestamp}, sentry_client=raven-python/6.10"
            ),
            None => format!(
                "Sentry sentry_signature={signature}, sentry_timestamp={timestamp}"
            ),
        }
    }

    #[test]
    fn parses_header_pairs() {
        let pairs = parse_auth_header("sentry  sentry_key = pub1 ,sentry_client=a=b").unwrap();
        assert_eq!(pairs.get("sentry_key").map(String::as_str), Some("pub1"));
        assert_eq!(pairs.get("sentry_client").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn rejects_malformed_headers() {
        for raw in [
            "",
            "Sentry",
            "Bearer sentry_key=pub1",
            "Sentry sentry_key",
            "Sentry sentry_key=pub1,,sentry_timestamp=1",
            "Sentry sentry_key=pub1, ",
        ] {
            assert_eq!(
                AuthEnvelope::from_header(raw),
                Err(AuthError::InvalidHeader),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn requires_signature_and_timestamp() {
        assert_eq!(
            AuthEnvelope::from_header("Sentry sentry_key=pub1, sentry_timestamp=1"),
            Err(AuthError::Unauthorized)
        );
        assert_eq!(
            AuthEnvelope::from_header("Sentry sentry_key=pub1, sentry_signature=ab"),
            Err(AuthError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn authenticates_known_key() {
        let raw = header(Some("pub1"), "s3cr3t", "1700000000", BODY);
        let credential = authenticator().authenticate(&raw, BODY, NOW).await;
        assert_eq!(credential, Ok(pub1()));
    }

    #[tokio::test]
    async fn expires_old_timestamps() {
        let raw = header(Some("pub1"), "s3cr3t", "1700000000", BODY);
        assert_eq!(
            authenticator().authenticate(&raw, BODY, 1_700_003_601.0).await,
            Err(AuthError::TimestampExpired)
        );
    }

    #[tokio::test]
    async fn replay_window_boundary() {
        let auth = authenticator();

        let fresh = header(Some("pub1"), "s3cr3t", "1699996400.5", BODY);
        assert_eq!(auth.authenticate(&fresh, BODY, NOW).await, Ok(pub1()));

        let stale = header(Some("pub1"), "s3cr3t", "1699996399.5", BODY);
        assert_eq!(
            auth.authenticate(&stale, BODY, NOW).await,
            Err(AuthError::TimestampExpired)
        );

        // The window is one-sided
        let future = header(Some("pub1"), "s3cr3t", "1700500000", BODY);
        assert_eq!(auth.authenticate(&future, BODY, NOW).await, Ok(pub1()));
    }

    #[tokio::test]
    async fn replay_window_is_configurable() {
        let auth = authenticator().with_replay_window(Duration::from_secs(60));
        let raw = header(Some("pub1"), "s3cr3t", "1699999900", BODY);
        assert_eq!(
            auth.authenticate(&raw, BODY, NOW).await,
            Err(AuthError::TimestampExpired)
        );
    }

    #[tokio::test]
    async fn expiry_is_checked_before_the_signature() {
        let raw = header(Some("pub1"), "wrong secret", "1600000000", BODY);
        assert_eq!(
            authenticator().authenticate(&raw, BODY, NOW).await,
            Err(AuthError::TimestampExpired)
        );
    }

    #[tokio::test]
    async fn rejects_bad_signatures_and_unknown_keys() {
        let auth = authenticator();

        let wrong_secret = header(Some("pub1"), "other", "1700000000", BODY);
        assert_eq!(
            auth.authenticate(&wrong_secret, BODY, NOW).await,
            Err(AuthError::Forbidden("Invalid signature".to_string()))
        );

        let tampered = header(Some("pub1"), "s3cr3t", "1700000000", BODY);
        assert_eq!(
            auth.authenticate(&tampered, br#"{"event_id":"abd"}"#, NOW).await,
            Err(AuthError::Forbidden("Invalid signature".to_string()))
        );

        let unknown = header(Some("pub9"), "s3cr3t", "1700000000", BODY);
        assert_eq!(
            auth.authenticate(&unknown, BODY, NOW).await,
            Err(AuthError::Forbidden("Invalid signature".to_string()))
        );
    }

    #[tokio::test]
    async fn rejects_unparsable_timestamps() {
        for timestamp in ["yesterday", "NaN", "inf"] {
            let raw = header(Some("pub1"), "s3cr3t", timestamp, BODY);
            assert_eq!(
                authenticator().authenticate(&raw, BODY, NOW).await,
                Err(AuthError::InvalidTimestamp),
                "{timestamp}"
            );
        }
    }

    #[tokio::test]
    async fn falls_back_to_default_credential() {
        let default = TenantCredential {
            public_key: String::new(),
            secret_key: "single-tenant".to_string(),
            tenant_id: 1,
        };
        let raw = header(None, "single-tenant", "1700000000", BODY);

        assert_eq!(
            authenticator().authenticate(&raw, BODY, NOW).await,
            Err(AuthError::Forbidden("Invalid signature".to_string()))
        );
        assert_eq!(
            authenticator()
                .with_default_credential(default.clone())
                .authenticate(&raw, BODY, NOW)
                .await,
            Ok(default)
        );
    }

    #[tokio::test]
    async fn store_outage_is_retryable() {
        let client = MockRedisClient::new()
            .get_err("ingest:credential:pub1", CustomRedisError::Timeout);
        let auth = Authenticator::new(Arc::new(RedisCredentialStore::new(Arc::new(client))));
        let raw = header(Some("pub1"), "s3cr3t", "1700000000", BODY);

        assert_eq!(
            auth.authenticate(&raw, BODY, NOW).await,
            Err(AuthError::StoreUnavailable)
        );
    }
}
