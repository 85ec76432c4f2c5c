use reqwest::StatusCode;
use serde_json::Value;

/// Failure of a backend call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Non-2xx response. `detail` is the parsed JSON body, or None when the body was empty or not JSON.
    #[error("{message}")]
    Status {
        status: u16,
        message: String,
        detail: Option<Value>,
    },
    /// Connection could not be established or was interrupted.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Build a status error from a response body, preferring a non-blank string `detail` field
    /// over the transport status phrase.
    pub(crate) fn from_status(status: StatusCode, body: &[u8]) -> Self {
        let detail: Option<Value> = serde_json::from_slice(body).ok();
        let fallback = status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.as_str().to_string());
        ApiError::Status {
            status: status.as_u16(),
            message: error_message(detail.as_ref(), fallback),
            detail,
        }
    }

    /// HTTP status when the server answered; None for transport and decode failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            ApiError::Decode(_) => None,
        }
    }

    pub fn detail(&self) -> Option<&Value> {
        match self {
            ApiError::Status { detail, .. } => detail.as_ref(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED.as_u16())
    }
}

fn error_message(detail: Option<&Value>, fallback: String) -> String {
    detail
        .and_then(|d| d.get("detail"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_field_becomes_message() {
        let err = ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, br#"{"detail":"boom"}"#);
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.detail(), Some(&serde_json::json!({"detail": "boom"})));
    }

    #[test]
    fn non_json_body_falls_back_to_status_phrase() {
        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, b"<html>oops</html>");
        assert_eq!(err.to_string(), "Bad Gateway");
        assert!(err.detail().is_none());
    }

    #[test]
    fn empty_body_has_null_detail() {
        let err = ApiError::from_status(StatusCode::NOT_FOUND, b"");
        assert_eq!(err.to_string(), "Not Found");
        assert!(err.detail().is_none());
    }

    #[test]
    fn blank_or_non_string_detail_is_ignored() {
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, br#"{"detail":"  "}"#);
        assert_eq!(err.to_string(), "Bad Request");
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, br#"{"question":["required"]}"#);
        assert_eq!(err.to_string(), "Bad Request");
        assert!(err.detail().is_some());
    }

    #[test]
    fn unauthorized_is_detected() {
        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, b"");
        assert!(err.is_unauthorized());
    }
}
