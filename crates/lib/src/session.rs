//! Session store and auth guard.
//!
//! The store owns the session cookies (it is the HTTP client's cookie provider) and the
//! current sign-in state. The guard runs the sign-in flows against the backend and signs
//! out when the client reports an unrecoverable authorization failure.

use crate::api::{endpoints, ApiClient, ApiError, ApiRequest};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Signed-in account as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Sign-in state. Starts as `Bootstrapping` until the first probe or login settles it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Bootstrapping,
    SignedOut,
    SignedIn(User),
}

/// Credentials and sign-in state shared by the HTTP client and the auth guard.
pub struct SessionStore {
    jar: RwLock<Arc<Jar>>,
    state: RwLock<AuthState>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            jar: RwLock::new(Arc::new(Jar::default())),
            state: RwLock::new(AuthState::Bootstrapping),
        }
    }

    fn jar(&self) -> Arc<Jar> {
        self.jar.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn state(&self) -> AuthState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn user(&self) -> Option<User> {
        match self.state() {
            AuthState::SignedIn(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state(), AuthState::SignedIn(_))
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.state() == AuthState::Bootstrapping
    }

    fn set_state(&self, state: AuthState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn set_signed_in(&self, user: User) {
        self.set_state(AuthState::SignedIn(user));
    }

    pub fn set_signed_out(&self) {
        self.set_state(AuthState::SignedOut);
    }

    /// Drop all stored credentials and sign out.
    pub fn clear(&self) {
        *self.jar.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(Jar::default());
        self.set_signed_out();
    }
}

impl CookieStore for SessionStore {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.jar().set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar().cookies(url)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("login response did not include a user")]
    MissingUser,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    #[serde(default)]
    user: Option<User>,
}

/// Sign-in flows over an [`ApiClient`]; state lands in the client's [`SessionStore`].
#[derive(Clone)]
pub struct AuthGuard {
    client: ApiClient,
}

impl AuthGuard {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        self.client.session()
    }

    /// GET /auth/me/: probe the current session. Any failure leaves the store signed out.
    pub async fn bootstrap(&self) -> Option<User> {
        match self
            .client
            .request_json::<UserEnvelope>(&ApiRequest::get(endpoints::ME))
            .await
        {
            Ok(UserEnvelope { user: Some(user) }) => {
                self.store().set_signed_in(user.clone());
                Some(user)
            }
            Ok(UserEnvelope { user: None }) => {
                self.store().set_signed_out();
                None
            }
            Err(e) => {
                if !e.is_unauthorized() {
                    log::warn!("session probe failed: {}", e);
                }
                self.store().set_signed_out();
                None
            }
        }
    }

    /// POST /auth/login/: the backend answers with session cookies and `{ "user": ... }`.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let req = ApiRequest::post(endpoints::LOGIN)
            .json(serde_json::json!({ "email": email, "password": password }));
        let res: UserEnvelope = self.client.request_json(&req).await?;
        match res.user {
            Some(user) => {
                log::info!("signed in as {}", user.email);
                self.store().set_signed_in(user.clone());
                Ok(user)
            }
            None => {
                self.store().set_signed_out();
                Err(AuthError::MissingUser)
            }
        }
    }

    /// POST /auth/refresh/: an expired refresh token signs out instead of failing.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let req = ApiRequest::post(endpoints::REFRESH).json(serde_json::json!({}));
        match self.client.request_json::<serde_json::Value>(&req).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_unauthorized() => {
                self.store().set_signed_out();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// POST /auth/logout/: always ends signed out; a 401 means the session was already gone.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let res = self
            .client
            .request_json::<Option<serde_json::Value>>(&ApiRequest::post(endpoints::LOGOUT))
            .await;
        self.store().clear();
        match res {
            Err(e) if !e.is_unauthorized() => Err(e),
            _ => Ok(()),
        }
    }

    /// Sign out whenever the client reports an unrecoverable 401. Runs until the client is dropped.
    pub fn watch_unauthorized(&self) -> JoinHandle<()> {
        let mut rx = self.client.subscribe_unauthorized();
        let store = self.store().clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        log::info!("session unauthorized at {}, signing out", event.endpoint);
                        store.set_signed_out();
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::debug!("unauthorized watcher lagged {} events", n);
                        store.set_signed_out();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
