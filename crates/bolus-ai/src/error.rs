//! Error types for bolus-ai

use thiserror::Error;

/// Result type alias using bolus-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when calling a reasoning provider
#[derive(Error, Debug)]
pub enum Error {
    /// API returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Whether the same request could succeed if sent again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Sse(_) => true,
            Error::Api {
                error_type,
                message,
            } => {
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("rate_limit")
                    || et.starts_with("http_5")
                    || et.contains("resource_exhausted")
                    || et.contains("unavailable")
                    || msg.contains("rate limit")
                    || msg.contains("overloaded")
                    || msg.contains("quota")
            }
            _ => false,
        }
    }
}
