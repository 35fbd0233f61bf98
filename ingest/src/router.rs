use std::future::ready;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::auth::Authenticator;
use crate::prometheus::{setup_metrics_recorder, track_metrics};
use crate::{sinks, store, time::TimeSource};

pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

#[derive(Clone)]
pub struct State {
    pub authenticator: Arc<Authenticator>,
    pub sink: Arc<dyn sinks::EventSink + Send + Sync>,
    pub timesource: Arc<dyn TimeSource + Send + Sync>,
}

async fn index() -> &'static str {
    "ingest"
}

pub fn router<
    TZ: TimeSource + Send + Sync + 'static,
    S: sinks::EventSink + Send + Sync + 'static,
>(
    timesource: TZ,
    authenticator: Authenticator,
    sink: S,
    metrics: bool,
    max_body_size: usize,
) -> Router {
    let state = State {
        authenticator: Arc::new(authenticator),
        sink: Arc::new(sink),
        timesource: Arc::new(timesource),
    };

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(index))
        .route("/api/store", post(store::event))
        .route("/api/store/", post(store::event))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Installing a global recorder when ingest is used as a library (during tests etc)
    // does not work well.
    if !metrics {
        return router;
    }
    match setup_metrics_recorder() {
        Ok(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        Err(err) => {
            error!("failed to install metrics recorder: {}", err);
            router
        }
    }
}
