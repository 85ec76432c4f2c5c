use crate::api::endpoints;
use crate::api::ApiError;
use crate::session::SessionStore;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Emitted once per call that ends in an unrecoverable 401. The host is expected to sign out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnauthorizedEvent {
    /// Endpoint path of the failing call (e.g. "/runs/3/chat/").
    pub endpoint: String,
}

/// One backend call: path relative to the API base URL, method, optional JSON body and query parameters.
/// Kept as plain data so the refresh-and-retry path can resend it unchanged.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    endpoint: String,
    method: Method,
    body: Option<Value>,
    params: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            body: None,
            params: Vec::new(),
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    /// Serialize `body` as the JSON request body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// HTTP client bound to one API base URL and one session store.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    session: Arc<SessionStore>,
    unauthorized: broadcast::Sender<UnauthorizedEvent>,
}

impl ApiClient {
    /// `base_url` includes any path prefix (e.g. "http://127.0.0.1:8000/api"); a trailing slash is dropped.
    pub fn new(base_url: impl Into<String>, session: Arc<SessionStore>) -> Result<Self, ApiError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .cookie_provider(session.clone())
            .build()?;
        let (unauthorized, _) = broadcast::channel(16);
        Ok(Self {
            base_url,
            client,
            session,
            unauthorized,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Subscribe to unrecoverable authorization failures.
    pub fn subscribe_unauthorized(&self) -> broadcast::Receiver<UnauthorizedEvent> {
        self.unauthorized.subscribe()
    }

    /// Send the request and decode the JSON response. A 204 decodes `T` from `null`
    /// without reading the body, so `()` and `Option<_>` are the natural empty results.
    pub async fn request_json<T: DeserializeOwned>(&self, req: &ApiRequest) -> Result<T, ApiError> {
        let res = self.send_with_refresh(req).await?;
        if res.status() == StatusCode::NO_CONTENT {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        let body = res.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Same auth handling as [`request_json`](Self::request_json) for the handshake, but the
    /// open response is handed back for the caller to read incrementally.
    pub async fn request_stream(&self, req: &ApiRequest) -> Result<Response, ApiError> {
        self.send_with_refresh(req).await
    }

    async fn send_with_refresh(&self, req: &ApiRequest) -> Result<Response, ApiError> {
        let mut res = self.send_once(req).await?;
        if res.status() == StatusCode::UNAUTHORIZED && !endpoints::is_auth_flow(&req.endpoint) {
            log::debug!("{} {} returned 401, refreshing session", req.method, req.endpoint);
            if self.refresh_session().await {
                res = self.send_once(req).await?;
            }
        }
        if res.status().is_success() {
            return Ok(res);
        }
        Err(self.failure(req, res).await)
    }

    async fn failure(&self, req: &ApiRequest, res: Response) -> ApiError {
        let status = res.status();
        let body = match res.bytes().await {
            Ok(b) => b.to_vec(),
            Err(e) => {
                log::debug!("reading error body of {} failed: {}", req.endpoint, e);
                Vec::new()
            }
        };
        let err = ApiError::from_status(status, &body);
        if status == StatusCode::UNAUTHORIZED {
            log::warn!("{} {} unauthorized after refresh attempt", req.method, req.endpoint);
            let _ = self.unauthorized.send(UnauthorizedEvent {
                endpoint: req.endpoint.clone(),
            });
        }
        err
    }

    /// POST /auth/refresh/: the server reads the refresh cookie and sets new ones. Never retried.
    async fn refresh_session(&self) -> bool {
        let req = ApiRequest::post(endpoints::REFRESH).json(serde_json::json!({}));
        match self.send_once(&req).await {
            Ok(res) if res.status().is_success() => true,
            Ok(res) => {
                log::debug!("session refresh rejected: {}", res.status());
                false
            }
            Err(e) => {
                log::debug!("session refresh failed: {}", e);
                false
            }
        }
    }

    async fn send_once(&self, req: &ApiRequest) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, req.endpoint);
        let mut builder = self.client.request(req.method.clone(), &url);
        if !req.params.is_empty() {
            builder = builder.query(&req.params);
        }
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }
}
