use serde::{Deserialize, Serialize};

/// Error body returned by the transcript server on non-2xx responses.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// The main error message
    pub message: String,
    /// Optional additional details about the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    /// Interprets a raw response body.
    ///
    /// Servers and proxies do not always answer with JSON, so a body that does
    /// not parse becomes the message verbatim, and an empty body falls back to
    /// the HTTP status text.
    #[must_use]
    pub fn from_body(status: &str, body: &str) -> Self {
        if let Ok(parsed) = serde_json::from_str::<Self>(body) {
            return parsed;
        }
        let trimmed = body.trim();
        if trimmed.is_empty() {
            Self::new(status)
        } else {
            Self::with_details(status, trimmed)
        }
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {}", self.message, details),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ErrorResponse {}
