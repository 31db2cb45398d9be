use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    Internal,
}

/// Error body returned by the conversation REST API on non-success responses.
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
}

/// An inbound payload that could not be normalized into its canonical shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {event} event: {reason}")]
pub struct MalformedEvent {
    pub event: String,
    pub reason: String,
}

impl MalformedEvent {
    pub fn new(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            reason: reason.into(),
        }
    }
}
