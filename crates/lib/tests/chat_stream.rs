//! Integration tests: streamed chat bodies read over a real connection, including events
//! split across network writes and a handshake that needs a session refresh.

mod common;

use axum::body::Body;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use common::{data_line, has_session, serve, signed_in_client, unauthorized};
use futures_util::stream::{self, StreamExt};
use runchat_core::chat::{stream_chat, AnswerContent, StreamCallbacks};
use serde_json::json;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Body that writes each part separately with a pause in between, so the client sees
/// several reads.
fn chunked(parts: Vec<String>) -> Response {
    let body = stream::iter(parts).then(|part| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<_, Infallible>(part)
    });
    Body::from_stream(body).into_response()
}

fn split_answer_parts() -> Vec<String> {
    let status = data_line(json!({ "type": "status", "step": "load", "message": "Loading" }));
    let answer = data_line(json!({
        "type": "answer",
        "content": {
            "answer": "Hi",
            "citations": ["general_stats"],
            "notes": [],
            "metric_key": null,
            "confidence": 72,
        },
    }));
    let (head, tail) = answer.split_at(answer.len() / 2);
    vec![
        status,
        "data: {not json}\n".to_string(),
        head.to_string(),
        tail.to_string(),
        data_line(json!({ "type": "message_id", "id": 31 })),
        "data: [DONE]\n".to_string(),
    ]
}

#[derive(Default)]
struct Recorder {
    calls: Vec<String>,
    answer: Option<AnswerContent>,
}

impl StreamCallbacks for Recorder {
    fn on_status(&mut self, step: &str, message: &str) {
        self.calls.push(format!("status:{}:{}", step, message));
    }

    fn on_answer(&mut self, content: &AnswerContent) {
        self.calls.push("answer".to_string());
        self.answer = Some(content.clone());
    }

    fn on_error(&mut self, message: &str) {
        self.calls.push(format!("error:{}", message));
    }

    fn on_message_id(&mut self, id: i64) {
        self.calls.push(format!("id:{}", id));
    }

    fn on_complete(&mut self) {
        self.calls.push("complete".to_string());
    }
}

#[tokio::test]
async fn split_event_is_reassembled_and_malformed_line_skipped() {
    let app = Router::new()
        .route("/api/auth/login/", post(common::login))
        .route(
            "/api/runs/4/chat/stream/",
            post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                if !has_session(&headers) {
                    return unauthorized();
                }
                assert_eq!(body, json!({ "question": "How many reads?" }));
                chunked(split_answer_parts())
            }),
        );
    let root = serve(app).await;
    let client = signed_in_client(&root).await;

    let mut rec = Recorder::default();
    stream_chat(&client, 4, "How many reads?", &mut rec).await.unwrap();

    assert_eq!(
        rec.calls,
        vec!["status:load:Loading", "answer", "id:31", "complete"]
    );
    let answer = rec.answer.unwrap();
    assert_eq!(answer.answer, "Hi");
    assert_eq!(answer.citations, vec!["general_stats"]);
    assert_eq!(answer.confidence, Some(72.0));
}

#[tokio::test]
async fn completion_fires_when_body_ends_without_sentinel() {
    let app = Router::new().route(
        "/api/runs/4/chat/stream/",
        post(|| async {
            chunked(vec![data_line(
                json!({ "type": "error", "message": "Run has no QC data" }),
            )])
        }),
    );
    let root = serve(app).await;
    let client = common::client(&root);

    let mut rec = Recorder::default();
    stream_chat(&client, 4, "q", &mut rec).await.unwrap();
    assert_eq!(rec.calls, vec!["error:Run has no QC data", "complete"]);
}

#[tokio::test]
async fn handshake_401_is_refreshed_before_streaming() {
    let opens = Arc::new(AtomicUsize::new(0));
    let seen = opens.clone();
    let app = Router::new()
        .route("/api/auth/refresh/", post(common::login))
        .route(
            "/api/runs/4/chat/stream/",
            post(move |headers: HeaderMap| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    if !has_session(&headers) {
                        return unauthorized();
                    }
                    chunked(vec!["data: [DONE]\n".to_string()])
                }
            }),
        );
    let root = serve(app).await;
    let client = common::client(&root);

    let mut rec = Recorder::default();
    stream_chat(&client, 4, "q", &mut rec).await.unwrap();
    assert_eq!(rec.calls, vec!["complete"]);
    assert_eq!(opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rejected_handshake_fails_without_callbacks() {
    let app = Router::new()
        .route("/api/auth/refresh/", post(|| async { unauthorized() }))
        .route("/api/runs/4/chat/stream/", post(|| async { unauthorized() }));
    let root = serve(app).await;
    let client = common::client(&root);

    let mut rec = Recorder::default();
    let err = stream_chat(&client, 4, "q", &mut rec).await.unwrap_err();
    assert!(err.is_unauthorized());
    assert!(rec.calls.is_empty());
}
