use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Conflict,
    Internal,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            409 => ErrorCode::Conflict,
            status if status >= 500 => ErrorCode::Internal,
            _ => ErrorCode::Validation,
        }
    }
}

/// A backend failure reduced to the shared vocabulary: a coarse code derived
/// from the HTTP status and whatever human-readable message the body held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_response_parts(status: u16, body: &str) -> Self {
        Self::new(ErrorCode::from_status(status), error_message_from_body(body))
    }
}

/// Extracts a human-readable message from whatever the backend put in an
/// error body. FastAPI-style `{"detail": ...}` and `{"message": ...}` bodies
/// are unwrapped; anything else is passed through verbatim.
pub fn error_message_from_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "request failed with an empty error body".to_string();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["detail", "message", "error"] {
            match value.get(key) {
                Some(serde_json::Value::String(message)) => return message.clone(),
                Some(other) if !other.is_null() => return other.to_string(),
                _ => {}
            }
        }
    }

    trimmed.to_string()
}
