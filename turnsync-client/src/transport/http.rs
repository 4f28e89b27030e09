use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};
use shared::{
    config::ClientConfig,
    models::{
        ErrorResponse, PushEvent, SendAccepted, SendCommandRequest, SendSelectionRequest,
        SessionListResponse, StreamFilter, TranscriptSlice, TurnId,
    },
};
use tracing::{debug, trace, warn};
use url::Url;

use super::{PushStream, SseDecoder, Transport};
use crate::error::SyncError;

/// reqwest-backed [`Transport`] for the transcript server's REST and SSE API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl HttpTransport {
    #[must_use]
    pub fn new(base: Url, token: Option<String>) -> Self {
        Self::with_client(Client::new(), base, token)
    }

    #[must_use]
    pub fn with_client(client: Client, base: Url, token: Option<String>) -> Self {
        Self {
            client,
            base,
            token,
        }
    }

    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.server_url.clone(), config.api_token.clone())
    }

    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        Ok(self.base.join(path)?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, SyncError> {
        let request = self.authorize(self.client.get(url).query(query));
        let response = checked(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, SyncError> {
        let request = self.authorize(self.client.post(url).json(body));
        let response = checked(request.send().await?).await?;
        Ok(response.json().await?)
    }
}

/// Turns a non-2xx response into [`SyncError::Http`] with the parsed body.
async fn checked(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let status_text = status
        .canonical_reason()
        .map_or_else(|| status.as_str().to_string(), str::to_string);
    Err(SyncError::Http {
        status: status.as_u16(),
        body: ErrorResponse::from_body(&status_text, &body),
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_transcript(
        &self,
        conversation_id: &str,
        before: Option<TurnId>,
        limit: Option<u32>,
    ) -> Result<TranscriptSlice, SyncError> {
        let url = self.endpoint(&format!("api/conversations/{conversation_id}/turns"))?;
        let mut query = Vec::new();
        if let Some(before) = before {
            query.push(("before", before.0.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        self.get_json(url, &query).await
    }

    async fn send_command(
        &self,
        conversation_id: &str,
        request: &SendCommandRequest,
    ) -> Result<SendAccepted, SyncError> {
        let url = self.endpoint(&format!("api/conversations/{conversation_id}/commands"))?;
        self.post_json(url, request).await
    }

    async fn send_selection(
        &self,
        conversation_id: &str,
        request: &SendSelectionRequest,
    ) -> Result<SendAccepted, SyncError> {
        let url = self.endpoint(&format!("api/conversations/{conversation_id}/selections"))?;
        self.post_json(url, request).await
    }

    async fn list_sessions(&self, include_ended: bool) -> Result<SessionListResponse, SyncError> {
        let url = self.endpoint("api/sessions")?;
        self.get_json(url, &[("include_ended", include_ended.to_string())])
            .await
    }

    async fn open_stream(&self, filter: &StreamFilter) -> Result<PushStream, SyncError> {
        let url = self.endpoint("api/stream")?;
        let request = self
            .authorize(self.client.get(url))
            .query(&filter.query_pairs())
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let response = checked(request.send().await?).await?;
        debug!(filter = ?filter, "push stream accepted");

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(error) => {
                        yield Err(SyncError::from(error));
                        break;
                    }
                };
                for frame in decoder.push(&chunk) {
                    match PushEvent::decode(frame.event.as_deref(), &frame.data) {
                        Ok(Some(event)) => yield Ok(event),
                        Ok(None) => trace!(event = ?frame.event, "unknown push event type skipped"),
                        Err(error) => warn!(%error, data = %frame.data, "malformed push frame skipped"),
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}
