use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::validation::FieldErrors;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    Validation(FieldErrors),

    #[error("Unauthorized - session is no longer valid")]
    Unauthorized,

    #[error("Session renewal failed: {0}")]
    Renewal(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
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

    /// Map a failed status to an error. `message` is the server's own
    /// explanation when the body carried one, otherwise the raw body.
    pub fn from_status(status: StatusCode, message: &str) -> Self {
        let truncated = Self::truncate_body(message);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            400..=499 => ApiError::Rejected(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// True when the failure means the session is gone and the user must
    /// sign in again.
    pub fn is_session_ended(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::Renewal(_))
    }

    /// Short message suitable for showing next to a form.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Validation(errors) => errors.to_string(),
            ApiError::Rejected(message) => message.clone(),
            ApiError::Unauthorized | ApiError::Renewal(_) => {
                "Session expired. Please log in again.".to_string()
            }
            ApiError::RateLimited => {
                "Server is busy. Please wait a moment and try again.".to_string()
            }
            ApiError::NetworkError(e) if e.is_timeout() => {
                "Connection timed out. Please try again.".to_string()
            }
            ApiError::NetworkError(_) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, "no"),
            ApiError::AccessDenied(m) if m == "no"
        ));
        assert!(matches!(ApiError::from_status(StatusCode::NOT_FOUND, "x"), ApiError::NotFound(_)));
        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, ""),
            ApiError::ServerError(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_REQUEST, "Invalid credentials"),
            ApiError::Rejected(m) if m == "Invalid credentials"
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FOUND, ""),
            ApiError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "é".repeat(400);
        let err = ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body);
        let ApiError::ServerError(message) = err else {
            panic!("expected server error");
        };
        assert!(message.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_session_ended() {
        assert!(ApiError::Unauthorized.is_session_ended());
        assert!(ApiError::Renewal("expired".into()).is_session_ended());
        assert!(!ApiError::RateLimited.is_session_ended());
        assert_eq!(
            ApiError::Rejected("Email already registered".into()).user_message(),
            "Email already registered"
        );
    }
}
