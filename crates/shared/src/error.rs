use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Unavailable,
    Internal,
}

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

/// Raised by transport adapters when a raw message cannot become an `Event`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("event is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("event must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("event is missing the required `stage` field")]
    MissingStage,
    #[error("event `stage` must be a string, got {0}")]
    InvalidStageType(&'static str),
}

impl From<EventError> for ApiError {
    fn from(value: EventError) -> Self {
        Self::new(ErrorCode::Validation, value.to_string())
    }
}
