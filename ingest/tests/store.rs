use std::sync::Arc;

use assert_json_diff::assert_json_include;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Map, Value};
use tower::ServiceExt; // for `oneshot`

use ingest::api::IngestResponse;
use ingest::auth::signature::sign;
use ingest::auth::Authenticator;
use ingest::credentials::{MemoryCredentialStore, TenantCredential};
use ingest::payload;
use ingest::router::{router, DEFAULT_MAX_BODY_SIZE};
use ingest::sinks::memory::MemorySink;
use ingest::time::FixedTime;

const NOW: f64 = 1_700_000_000.0;
const EVENT_ID: &str = "fc6d8c0c43fc4630ad850ee518f1b9d0";

fn setup(now: f64) -> (Router, MemorySink) {
    let credentials = MemoryCredentialStore::new().with_credential(TenantCredential {
        public_key: "pub1".to_string(),
        secret_key: "s3cr3t".to_string(),
        tenant_id: 42,
    });
    let sink = MemorySink::default();
    let app = router(
        FixedTime { unix: now },
        Authenticator::new(Arc::new(credentials)),
        sink.clone(),
        false,
        DEFAULT_MAX_BODY_SIZE,
    );
    (app, sink)
}

fn auth_header(secret: &str, timestamp: &str, body: &[u8]) -> String {
    format!(
        "Sentry sentry_key=pub1, sentry_signature={}, sentry_timestamp={timestamp}, sentry_client=raven-js/3.27",
        sign(secret, timestamp, body).unwrap()
    )
}

fn store_request(header_name: &str, header: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/store/")
        .header(header_name, header)
        .body(Body::from(body))
        .unwrap()
}

fn exception_payload() -> Map<String, Value> {
    match json!({
        "event_id": EVENT_ID,
        "platform": "python",
        "exception": {"values": [{
            "type": "ZeroDivisionError",
            "value": "division by zero",
            "stacktrace": {"frames": [
                {"module": "app.views", "function": "index", "context_line": "    return 1 / 0"}
            ]}
        }]}
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn accepts_signed_json() {
    let (app, sink) = setup(NOW);
    let body = serde_json::to_vec(&exception_payload()).unwrap();
    let header = auth_header("s3cr3t", "1700000000", &body);

    let response = app
        .oneshot(store_request("x-sentry-auth", &header, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: IngestResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed.id, EVENT_ID);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].project_id, 42);
    assert_eq!(events[0].hashes.len(), 1);
    assert_eq!(events[0].received_at, "2023-11-14T22:13:20Z");
    assert_json_include!(
        actual: serde_json::from_str::<Value>(&events[0].data).unwrap(),
        expected: json!({"event_id": EVENT_ID, "platform": "python"})
    );
}

#[tokio::test]
async fn accepts_compressed_bodies_through_authorization() {
    let (app, sink) = setup(NOW);
    let body = payload::encode(&exception_payload()).unwrap();
    let header = auth_header("s3cr3t", "1700000000", &body);

    let response = app
        .oneshot(store_request("authorization", &header, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn compressed_and_plain_bodies_group_together() {
    let (app, sink) = setup(NOW);

    let plain = serde_json::to_vec(&exception_payload()).unwrap();
    let compressed = payload::encode(&exception_payload()).unwrap();
    for body in [plain, compressed] {
        let header = auth_header("s3cr3t", "1700000000", &body);
        let response = app
            .clone()
            .oneshot(store_request("x-sentry-auth", &header, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].hashes, events[1].hashes);
}

#[tokio::test]
async fn rejects_expired_requests() {
    let (app, sink) = setup(1_700_003_601.0);
    let body = serde_json::to_vec(&exception_payload()).unwrap();
    let header = auth_header("s3cr3t", "1700000000", &body);

    let response = app
        .oneshot(store_request("x-sentry-auth", &header, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(
        &body[..],
        b"timestamp is too old, resend with a fresh timestamp"
    );
    assert!(sink.is_empty());
}

#[tokio::test]
async fn rejects_bad_signatures() {
    let (app, sink) = setup(NOW);
    let body = serde_json::to_vec(&exception_payload()).unwrap();
    let header = auth_header("wrong", "1700000000", &body);

    let response = app
        .oneshot(store_request("x-sentry-auth", &header, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"Invalid signature");
    assert!(sink.is_empty());
}

#[tokio::test]
async fn rejects_missing_and_malformed_headers() {
    let (app, _) = setup(NOW);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/store")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(store_request("x-sentry-auth", "Sentry nonsense", b"{}".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn undecodable_bodies_get_a_generic_error() {
    let (app, sink) = setup(NOW);
    let body = b"%%% definitely not base64 %%%".to_vec();
    let header = auth_header("s3cr3t", "1700000000", &body);

    let response = app
        .oneshot(store_request("x-sentry-auth", &header, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"failed to decode request");
    assert!(sink.is_empty());
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let credentials = MemoryCredentialStore::new();
    let app = router(
        FixedTime { unix: NOW },
        Authenticator::new(Arc::new(credentials)),
        MemorySink::default(),
        false,
        64,
    );

    let body = vec![b'{'; 128];
    let header = auth_header("s3cr3t", "1700000000", &body);
    let response = app
        .oneshot(store_request("x-sentry-auth", &header, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn serves_probes() {
    let (app, _) = setup(NOW);
    for uri in ["/", "/_readiness", "/_liveness"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }
}
