//! Local stand-in for the runs backend: an axum server on an ephemeral port.

#![allow(dead_code)]

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::{Json, Router};
use runchat_core::api::ApiClient;
use runchat_core::session::{AuthGuard, SessionStore};
use serde_json::json;
use std::sync::Arc;

pub const ACCESS_COOKIE: &str = "access=valid";

/// Serve `router` on 127.0.0.1 and return its root URL (no trailing slash).
/// The server task is left running when the test ends.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}

/// Client rooted at `{root}/api` with a fresh session store.
pub fn client(root: &str) -> ApiClient {
    ApiClient::new(format!("{}/api", root), Arc::new(SessionStore::new())).expect("build client")
}

/// Sign in through the mock `/api/auth/login/` route.
pub async fn signed_in_client(root: &str) -> ApiClient {
    let client = client(root);
    AuthGuard::new(client.clone())
        .login("analyst@example.com", "secret")
        .await
        .expect("login");
    client
}

pub fn has_session(headers: &HeaderMap) -> bool {
    headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains(ACCESS_COOKIE))
        .unwrap_or(false)
}

/// Login handler: sets the access cookie for the whole host and returns the user.
pub async fn login() -> Response {
    (
        AppendHeaders([(SET_COOKIE, format!("{}; Path=/; HttpOnly", ACCESS_COOKIE))]),
        Json(json!({ "user": { "email": "analyst@example.com", "username": "analyst" } })),
    )
        .into_response()
}

pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "Authentication credentials were not provided." })),
    )
        .into_response()
}

/// A `data: ` line for one JSON event.
pub fn data_line(event: serde_json::Value) -> String {
    format!("data: {}\n", event)
}
