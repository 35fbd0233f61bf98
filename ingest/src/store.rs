use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use metrics::counter;
use tracing::{error, instrument, warn, Span};

use crate::api::{IngestError, IngestResponse};
use crate::auth::AuthError;
use crate::event::GroupedEvent;
use crate::payload::{self, DecodeError};
use crate::prometheus::{report_auth_failure, report_dropped_events, INGEST_REQUESTS_TOTAL};
use crate::router;

pub const AUTH_HEADER: &str = "x-sentry-auth";

/// `X-Sentry-Auth` when present, `Authorization` otherwise.
fn auth_header(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTH_HEADER)
        .or_else(|| headers.get(axum::http::header::AUTHORIZATION))
        .ok_or(AuthError::Unauthorized)?;
    value.to_str().map_err(|_| AuthError::InvalidHeader)
}

#[instrument(
    skip_all,
    fields(user_agent, content_length, tenant_id, event_id, platform)
)]
pub async fn event(
    state: State<router::State>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>, IngestError> {
    counter!(INGEST_REQUESTS_TOTAL).increment(1);

    let user_agent = headers
        .get("user-agent")
        .map_or("unknown", |v| v.to_str().unwrap_or("unknown"));
    Span::current().record("user_agent", user_agent);
    Span::current().record("content_length", body.len());

    let now = state.timesource.now_unix();
    let credential = match auth_header(&headers) {
        Ok(raw) => state.authenticator.authenticate(raw, &body, now).await,
        Err(err) => Err(err),
    }
    .map_err(|err| {
        report_auth_failure(err.reason());
        match &err {
            AuthError::StoreUnavailable => error!("rejected request: {}", err),
            _ => warn!("rejected request: {}", err),
        }
        err
    })?;
    Span::current().record("tenant_id", credential.tenant_id);

    let grouped = payload::decode(&body).and_then(|payload| {
        GroupedEvent::from_payload(
            credential.tenant_id,
            payload,
            state.timesource.current_time(),
        )
    });
    let grouped = grouped.map_err(|err| {
        let DecodeError::BadRequestData { kind, message } = &err;
        warn!(kind, message, "failed to decode event");
        report_dropped_events("bad_request_data", 1);
        err
    })?;

    Span::current().record("event_id", grouped.event_id.as_str());
    Span::current().record("platform", grouped.platform.as_str());

    let id = grouped.event_id.clone();
    state.sink.send(grouped).await?;

    Ok(Json(IngestResponse { id }))
}
