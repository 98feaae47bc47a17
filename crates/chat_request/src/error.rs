use std::time::Duration;

use chat_stream::DecodeError;
use reqwest::StatusCode;
use thiserror::Error;

pub const DEFAULT_ERROR_NAME: &str = "SystemError";
pub const DEFAULT_ERROR_MESSAGE: &str = "System error";

#[derive(Error, Debug, Clone)]
pub enum RequestError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("The operation was aborted")]
    Cancelled,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Stream idle for more than {0:?}")]
    StreamTimeout(Duration),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A well-formed JSON body of the shape `{"success": false, ...}`.
    #[error("{message}")]
    Application {
        name: String,
        message: String,
        info: serde_json::Value,
    },
}

pub type Result<T> = std::result::Result<T, RequestError>;

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl RequestError {
    /// `true` when the exchange was explicitly aborted.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Stable error name callers can branch on.
    pub fn name(&self) -> &str {
        match self {
            Self::Http(_) => "HttpError",
            Self::Status { .. } => "StatusError",
            Self::Cancelled => "AbortError",
            Self::Timeout(_) => "TimeoutError",
            Self::StreamTimeout(_) => "StreamTimeoutError",
            Self::UnsupportedContentType(_) => "ContentTypeError",
            Self::Decode(_) => "DecodeError",
            Self::Application { name, .. } => name.as_str(),
        }
    }

    /// Build the application-level error for a `{"success": false}` body.
    pub fn application(body: serde_json::Value) -> Self {
        let field = |key: &str| {
            body.get(key)
                .and_then(|value| value.as_str())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self::Application {
            name: field("name").unwrap_or_else(|| DEFAULT_ERROR_NAME.to_string()),
            message: field("message").unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
            info: body,
        }
    }
}
