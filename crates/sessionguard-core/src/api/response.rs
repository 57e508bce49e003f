use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ApiError;

/// A fully read HTTP response.
///
/// The auth service wraps payloads as `{success, data, message}`; bodies
/// without that envelope are treated as the payload itself.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl ApiResponse {
    /// Read status, headers and body. An empty body becomes `Null`; a body
    /// that is not JSON is kept as a string.
    pub async fn read(response: reqwest::Response) -> Result<Self, ApiError> {
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// 2xx and not explicitly flagged `success: false`.
    pub fn is_success(&self) -> bool {
        self.status.is_success() && self.body.get("success").and_then(Value::as_bool) != Some(false)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// The server's `message` field, if any.
    pub fn message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }

    /// Decode the payload, unwrapping the envelope when present.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let payload = match self.body.get("data") {
            Some(data) if !data.is_null() => data,
            _ => &self.body,
        };
        serde_json::from_value(payload.clone())
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse payload: {}", e)))
    }

    /// The error this response represents when it is not a success.
    pub fn error(&self) -> ApiError {
        let detail = match (self.message(), &self.body) {
            (Some(message), _) => message.to_string(),
            (None, Value::String(text)) => text.clone(),
            (None, Value::Null) => String::new(),
            (None, other) => other.to_string(),
        };
        if self.status.is_success() {
            // 2xx with success:false
            ApiError::Rejected(if detail.is_empty() {
                "Request failed".to_string()
            } else {
                detail
            })
        } else {
            ApiError::from_status(self.status, &detail)
        }
    }

    /// Payload on success, mapped error otherwise.
    pub fn into_payload<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        if self.is_success() {
            self.payload()
        } else {
            Err(self.error())
        }
    }
}
