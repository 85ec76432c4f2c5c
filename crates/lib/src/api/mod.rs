//! Authenticated HTTP client for the runs backend.
//!
//! Every request carries the session cookies. A 401 on a non-auth endpoint triggers one
//! session refresh and one retry; an unrecoverable 401 is announced to subscribers.

mod client;
pub mod endpoints;
mod error;

pub use client::{ApiClient, ApiRequest, UnauthorizedEvent};
pub use error::ApiError;
