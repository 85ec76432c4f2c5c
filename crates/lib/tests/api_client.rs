//! Integration tests: error mapping, cookie credentials and the refresh-and-retry path
//! against a local mock backend.

mod common;

use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use common::{has_session, serve, signed_in_client, unauthorized};
use runchat_core::api::{ApiClient, ApiError, ApiRequest};
use runchat_core::chat::{ChatBackend, HttpChatBackend};
use runchat_core::runs::RunsApi;
use runchat_core::session::{AuthGuard, AuthState};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Counters {
    refresh: AtomicUsize,
    runs: AtomicUsize,
}

fn run_json(pk: i64, status: &str) -> serde_json::Value {
    json!({
        "pk": pk,
        "run_id": format!("run-{}", pk),
        "name": "RNA-seq batch",
        "status": status,
        "pipeline": "nf-core/rnaseq",
        "created_at": "2024-05-01T10:00:00Z",
        "started_at": null,
        "completed_at": null,
        "s3_report_key": "",
    })
}

/// `/runs/` fails with 401 for the first `failures` calls; refresh succeeds when `refresh_ok`.
fn refresh_router(counters: Arc<Counters>, failures: usize, refresh_ok: bool) -> Router {
    let runs_counters = counters.clone();
    Router::new()
        .route("/api/auth/login/", post(common::login))
        .route(
            "/api/auth/refresh/",
            post(move || {
                let counters = counters.clone();
                async move {
                    counters.refresh.fetch_add(1, Ordering::SeqCst);
                    if refresh_ok {
                        Json(json!({ "detail": "refreshed" })).into_response()
                    } else {
                        unauthorized()
                    }
                }
            }),
        )
        .route(
            "/api/runs/",
            get(move || {
                let counters = runs_counters.clone();
                async move {
                    let n = counters.runs.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        unauthorized()
                    } else {
                        Json(json!([run_json(1, "COMPLETED")])).into_response()
                    }
                }
            }),
        )
}

#[tokio::test]
async fn error_detail_becomes_message() {
    let app = Router::new()
        .route(
            "/api/runs/",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": "boom" }))) }),
        )
        .route(
            "/api/runs/2/",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        );
    let root = serve(app).await;
    let client = common::client(&root);

    let err = client
        .request_json::<serde_json::Value>(&ApiRequest::get("/runs/"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.to_string(), "boom");
    assert_eq!(err.detail(), Some(&json!({ "detail": "boom" })));

    let err = client
        .request_json::<serde_json::Value>(&ApiRequest::get("/runs/2/"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(502));
    assert_eq!(err.to_string(), "Bad Gateway");
    assert!(err.detail().is_none());
}

#[tokio::test]
async fn login_cookie_is_sent_and_query_params_appended() {
    let app = Router::new()
        .route("/api/auth/login/", post(common::login))
        .route(
            "/api/runs/",
            get(|headers: HeaderMap, Query(params): Query<HashMap<String, String>>| async move {
                if !has_session(&headers) {
                    return unauthorized();
                }
                let status = if params.get("refresh").map(String::as_str) == Some("true") {
                    "SUCCEEDED"
                } else {
                    "RUNNING"
                };
                Json(json!([run_json(7, status)])).into_response()
            }),
        )
        .route("/api/auth/refresh/", post(|| async { unauthorized() }));
    let root = serve(app).await;
    let client = signed_in_client(&root).await;
    assert!(client.session().is_authenticated());

    let runs = RunsApi::new(client.clone());
    let listed = runs.list_runs(false).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].pk, 7);
    assert!(!listed[0].is_chat_ready());

    let refreshed = runs.list_runs(true).await.unwrap();
    assert!(refreshed[0].is_chat_ready());
}

#[tokio::test]
async fn single_401_is_refreshed_and_retried_once() {
    let counters = Arc::new(Counters::default());
    let root = serve(refresh_router(counters.clone(), 1, true)).await;
    let client = common::client(&root);

    let runs = RunsApi::new(client).list_runs(false).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(counters.refresh.load(Ordering::SeqCst), 1);
    assert_eq!(counters.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn consecutive_401s_make_no_third_attempt() {
    let counters = Arc::new(Counters::default());
    let root = serve(refresh_router(counters.clone(), usize::MAX, true)).await;
    let client = common::client(&root);
    let mut events = client.subscribe_unauthorized();

    let err = RunsApi::new(client).list_runs(false).await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(counters.refresh.load(Ordering::SeqCst), 1);
    assert_eq!(counters.runs.load(Ordering::SeqCst), 2);

    let event = events.recv().await.unwrap();
    assert_eq!(event.endpoint, "/runs/");
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn failed_refresh_skips_retry() {
    let counters = Arc::new(Counters::default());
    let root = serve(refresh_router(counters.clone(), usize::MAX, false)).await;
    let client = common::client(&root);

    let err = RunsApi::new(client).list_runs(false).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(counters.refresh.load(Ordering::SeqCst), 1);
    assert_eq!(counters.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_login_is_not_refreshed() {
    let refreshes = Arc::new(AtomicUsize::new(0));
    let seen = refreshes.clone();
    let app = Router::new()
        .route(
            "/api/auth/login/",
            post(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "detail": "Invalid credentials" })),
                )
            }),
        )
        .route(
            "/api/auth/refresh/",
            post(move || {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Json(json!({}))
                }
            }),
        );
    let root = serve(app).await;
    let client = common::client(&root);

    let err = AuthGuard::new(client.clone())
        .login("analyst@example.com", "wrong")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Invalid credentials");
    assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    assert_eq!(client.session().state(), AuthState::Bootstrapping);
}

#[tokio::test]
async fn no_content_is_an_empty_result() {
    let app = Router::new().route(
        "/api/runs/3/chat/",
        delete(|| async { StatusCode::NO_CONTENT }),
    );
    let root = serve(app).await;
    let client = common::client(&root);

    HttpChatBackend::new(client.clone()).clear_history(3).await.unwrap();
    let empty: Option<serde_json::Value> = client
        .request_json(&ApiRequest::delete("/runs/3/chat/"))
        .await
        .unwrap();
    assert!(empty.is_none());
}

async fn wait_for_state(client: &ApiClient, expected: AuthState) {
    for _ in 0..100 {
        if client.session().state() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never reached {:?}", expected);
}

#[tokio::test]
async fn unrecoverable_401_signs_out_through_watcher() {
    let counters = Arc::new(Counters::default());
    let root = serve(refresh_router(counters, usize::MAX, false)).await;
    let client = signed_in_client(&root).await;
    let guard = AuthGuard::new(client.clone());
    let _watcher = guard.watch_unauthorized();
    assert!(client.session().is_authenticated());

    let err: ApiError = RunsApi::new(client.clone()).list_runs(false).await.unwrap_err();
    assert!(err.is_unauthorized());
    wait_for_state(&client, AuthState::SignedOut).await;
}

#[tokio::test]
async fn bootstrap_and_logout() {
    let app = Router::new()
        .route("/api/auth/login/", post(common::login))
        .route(
            "/api/auth/me/",
            get(|headers: HeaderMap| async move {
                if has_session(&headers) {
                    Json(json!({ "user": { "email": "analyst@example.com" } })).into_response()
                } else {
                    unauthorized()
                }
            }),
        )
        .route("/api/auth/refresh/", post(|| async { unauthorized() }))
        .route("/api/auth/logout/", post(|| async { StatusCode::NO_CONTENT }));
    let root = serve(app).await;
    let client = common::client(&root);
    let guard = AuthGuard::new(client.clone());

    assert!(guard.bootstrap().await.is_none());
    assert_eq!(client.session().state(), AuthState::SignedOut);

    guard.login("analyst@example.com", "secret").await.unwrap();
    let user = guard.bootstrap().await.unwrap();
    assert_eq!(user.email, "analyst@example.com");

    guard.logout().await.unwrap();
    assert_eq!(client.session().state(), AuthState::SignedOut);
    // Credentials are gone: the session check is unauthorized again.
    assert!(guard.bootstrap().await.is_none());
}
