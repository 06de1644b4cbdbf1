use serde::Deserialize;
use thiserror::Error;

/// Shown to the user when the server did not explain a failure.
pub const FALLBACK_MESSAGE: &str = "Something went wrong. Please try again later.";

/// Maximum length for error response bodies kept in errors.
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum ApiError {
    /// HTTP 401: the credential is missing, expired, or revoked.
    #[error("unauthorized: {}", .message.as_deref().unwrap_or("credential rejected"))]
    Unauthorized { message: Option<String> },

    /// Any other non-success status.
    #[error("request rejected with status {status}: {}", .message.as_deref().unwrap_or("no details"))]
    Rejected { status: u16, message: Option<String> },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Error body the server sends alongside non-success statuses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl ApiError {
    /// Build an error from a non-success status and its body.
    ///
    /// The server's `message` field is kept when the body is JSON; otherwise
    /// a truncated copy of the raw body is used.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty() && !trimmed.starts_with('{')).then(|| Self::truncate_body(trimmed))
            });

        match status.as_u16() {
            401 => ApiError::Unauthorized { message },
            code => ApiError::Rejected {
                status: code,
                message,
            },
        }
    }

    /// Whether this failure means the bearer credential was not accepted.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    /// Message suitable for showing to the user.
    ///
    /// Uses the server-supplied message when there is one, otherwise
    /// [`FALLBACK_MESSAGE`].
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Unauthorized { message: Some(m) }
            | ApiError::Rejected {
                message: Some(m), ..
            } => m.clone(),
            _ => FALLBACK_MESSAGE.to_string(),
        }
    }

    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_server_message_is_extracted() {
        let err = ApiError::from_status(
            StatusCode::BAD_REQUEST,
            r#"{"status":"error","message":"E-mail e/ou senha incorreta."}"#,
        );
        assert!(matches!(err, ApiError::Rejected { status: 400, .. }));
        assert_eq!(err.user_message(), "E-mail e/ou senha incorreta.");
    }

    #[test]
    fn test_401_is_unauthorized() {
        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, r#"{"message":"token.expired"}"#);
        assert!(err.is_unauthorized());
        assert_eq!(err.user_message(), "token.expired");
    }

    #[test]
    fn test_fallback_message_without_details() {
        let err = ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "{}");
        assert_eq!(err.user_message(), FALLBACK_MESSAGE);

        let err = ApiError::InvalidResponse("missing token".to_string());
        assert_eq!(err.user_message(), FALLBACK_MESSAGE);
    }

    #[test]
    fn test_plain_text_body_is_truncated() {
        let body = "x".repeat(2000);
        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, &body);
        match err {
            ApiError::Rejected {
                message: Some(m), ..
            } => assert!(m.contains("truncated, 2000 total bytes")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
