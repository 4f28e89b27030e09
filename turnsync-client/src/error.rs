use shared::models::ErrorResponse;
use thiserror::Error;

use crate::store::LocalId;

/// Errors surfaced by the transport and the sync handle.
///
/// Payloads are kept as strings so the error can travel inside broadcast
/// notifications.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server responded with {status}: {body}")]
    Http { status: u16, body: ErrorResponse },

    #[error("failed to decode server response: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("push channel closed")]
    ChannelClosed,

    #[error("no conversation is open")]
    NoConversation,

    #[error("sync client has shut down")]
    Shutdown,
}

impl SyncError {
    /// Whether the server rejected the request, as opposed to the request
    /// never reaching it.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Http { .. } | Self::InvalidRequest(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// A send that failed before the server confirmed it. Carries the original
/// text so the caller can offer it again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("message not sent: {error}")]
pub struct SendFailure {
    pub local_id: LocalId,
    pub text: String,
    pub error: SyncError,
}
