//! Backend path templates. `id` is the numeric run primary key.

pub type RunId = i64;

pub const LOGIN: &str = "/auth/login/";
pub const REFRESH: &str = "/auth/refresh/";
pub const LOGOUT: &str = "/auth/logout/";
pub const ME: &str = "/auth/me/";
pub const HEALTH: &str = "/health/";
pub const RUNS: &str = "/runs/";

pub fn run_detail(id: RunId) -> String {
    format!("/runs/{}/", id)
}

pub fn run_metrics(id: RunId) -> String {
    format!("/runs/{}/metrics/", id)
}

pub fn multiqc_report(id: RunId) -> String {
    format!("/runs/{}/multiqc-report/", id)
}

/// History (GET), synchronous ask (POST) and clear (DELETE).
pub fn chat(id: RunId) -> String {
    format!("/runs/{}/chat/", id)
}

pub fn chat_stream(id: RunId) -> String {
    format!("/runs/{}/chat/stream/", id)
}

/// Endpoints that must never trigger a refresh-and-retry (they are the session flow itself).
pub fn is_auth_flow(endpoint: &str) -> bool {
    endpoint == LOGIN || endpoint == REFRESH
}
