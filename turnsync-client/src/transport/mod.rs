//! Network seam between the sync core and the transcript server.

pub mod http;
pub mod sse;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use shared::models::{
    PushEvent, SendAccepted, SendCommandRequest, SendSelectionRequest, SessionListResponse,
    StreamFilter, TranscriptSlice, TurnId,
};

use crate::error::SyncError;

pub use http::HttpTransport;
pub use sse::{SseDecoder, SseFrame};

/// Decoded push events. The stream ends when the server closes the channel.
pub type PushStream = BoxStream<'static, Result<PushEvent, SyncError>>;

/// Everything the driver needs from the server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// `before`/`limit` unset asks for the newest page.
    async fn fetch_transcript(
        &self,
        conversation_id: &str,
        before: Option<TurnId>,
        limit: Option<u32>,
    ) -> Result<TranscriptSlice, SyncError>;

    async fn send_command(
        &self,
        conversation_id: &str,
        request: &SendCommandRequest,
    ) -> Result<SendAccepted, SyncError>;

    async fn send_selection(
        &self,
        conversation_id: &str,
        request: &SendSelectionRequest,
    ) -> Result<SendAccepted, SyncError>;

    async fn list_sessions(&self, include_ended: bool) -> Result<SessionListResponse, SyncError>;

    /// Resolves once the server accepted the stream.
    async fn open_stream(&self, filter: &StreamFilter) -> Result<PushStream, SyncError>;
}
