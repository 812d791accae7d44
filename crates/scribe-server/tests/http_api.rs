//! HTTP contract tests over an in-memory engine and a scripted source.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use futures::stream;
use scribe_core::{
    EventStream, GenerationError, GenerationEvent, GenerationParams, GenerationSource,
    MemoryRecords, MemoryStreamStore, SourceId, StreamEngine,
};
use scribe_server::app;
use serde_json::{Value, json};
use tower::ServiceExt; // for `oneshot`

struct ScriptedSource {
    deltas: Vec<&'static str>,
    hang: bool,
}

#[async_trait::async_trait]
impl GenerationSource for ScriptedSource {
    fn id(&self) -> SourceId {
        SourceId::new("scripted")
    }

    async fn start(&self, _params: &GenerationParams) -> Result<EventStream, GenerationError> {
        let head = stream::iter(
            self.deltas
                .iter()
                .map(|d| Ok(GenerationEvent::TextDelta((*d).to_string())))
                .collect::<Vec<_>>(),
        );
        if self.hang {
            Ok(Box::pin(futures::StreamExt::chain(head, stream::pending())))
        } else {
            Ok(Box::pin(head))
        }
    }
}

fn router(deltas: Vec<&'static str>, hang: bool) -> Router {
    let engine = StreamEngine::builder()
        .store(Arc::new(MemoryStreamStore::new()))
        .source(Arc::new(ScriptedSource { deltas, hang }))
        .records(Arc::new(MemoryRecords::new()))
        .build()
        .expect("engine");
    app(engine)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap_or_else(|_| json!({})))
}

async fn create(app: &Router, context_id: &str) -> String {
    let (status, body) = send_json(
        app,
        Method::POST,
        "/streams",
        Some(json!({ "context_id": context_id, "parameters": { "prompt": "hi" } })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["stream_id"].as_str().expect("stream id").to_string()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = router(vec![], false);
    let (status, body) = send_json(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn generate_streams_text_then_read_returns_the_same() {
    let app = router(vec!["Hel", "lo, ", "world.", " Bye"], false);
    let id = create(&app, "turn-1").await;

    let (status, body) = send(&app, Method::POST, &format!("/streams/{id}/generate"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).expect("utf8"), "Hello, world. Bye");

    let (status, snapshot) = send_json(&app, Method::GET, &format!("/streams/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot, json!({ "text": "Hello, world. Bye", "status": "done" }));
}

#[tokio::test]
async fn second_generate_is_conflict_with_empty_body() {
    let app = router(vec!["Once."], false);
    let id = create(&app, "turn-2").await;
    let (status, _) = send(&app, Method::POST, &format!("/streams/{id}/generate"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::POST, &format!("/streams/{id}/generate"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.is_empty());
}

#[tokio::test]
async fn unknown_stream_is_not_found() {
    let app = router(vec![], false);
    let missing = uuid::Uuid::new_v4();
    let (status, body) = send_json(&app, Method::GET, &format!("/streams/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().is_some());

    let (status, _) = send(&app, Method::POST, &format!("/streams/{missing}/generate"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pending_stream_reads_empty() {
    let app = router(vec![], false);
    let id = create(&app, "turn-3").await;
    let (status, snapshot) = send_json(&app, Method::GET, &format!("/streams/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot, json!({ "text": "", "status": "pending" }));
}

#[tokio::test]
async fn empty_context_id_is_rejected() {
    let app = router(vec![], false);
    let (status, _) = send_json(&app, Method::POST, "/streams", Some(json!({ "context_id": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_finds_active_stream_and_is_idempotent() {
    let app = router(vec!["Kept part."], true);
    let id = create(&app, "turn-4").await;

    let (status, active) = send_json(&app, Method::GET, "/contexts/turn-4/stream", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["stream_id"], json!(id));

    let generate_app = app.clone();
    let generate_uri = format!("/streams/{id}/generate");
    let generation = tokio::spawn(async move {
        send(&generate_app, Method::POST, &generate_uri, None).await
    });

    let read_uri = format!("/streams/{id}");
    let mut persisted = false;
    for _ in 0..200 {
        let (_, snapshot) = send_json(&app, Method::GET, &read_uri, None).await;
        if snapshot["text"] == "Kept part." {
            persisted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(persisted, "first sentence never persisted");

    let (status, outcome) = send_json(&app, Method::POST, "/contexts/turn-4/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome, json!({ "cancelled": true, "stream_id": id }));

    let (status, body) = generation.await.expect("join");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).expect("utf8"), "Kept part.");

    let (_, snapshot) = send_json(&app, Method::GET, &read_uri, None).await;
    assert_eq!(snapshot, json!({ "text": "Kept part.", "status": "error" }));

    let (_, again) = send_json(&app, Method::POST, "/contexts/turn-4/cancel", None).await;
    assert_eq!(again, json!({ "cancelled": false }));
    let (_, active) = send_json(&app, Method::GET, "/contexts/turn-4/stream", None).await;
    assert_eq!(active, json!({ "stream_id": null }));
}
