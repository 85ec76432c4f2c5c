use super::protocol::{ConversationHistory, HistoryMessage};
use super::stream::{open_chat_stream, ChatEvents};
use crate::api::endpoints::{self, RunId};
use crate::api::{ApiClient, ApiError, ApiRequest};
use async_trait::async_trait;

/// Per-run chat endpoints as seen by [`ChatSession`](super::ChatSession).
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Persisted conversation, oldest first.
    async fn history(&self, run_id: RunId) -> Result<Vec<HistoryMessage>, ApiError>;

    /// Synchronous ask: the full reply in one response.
    async fn ask(&self, run_id: RunId, question: &str) -> Result<HistoryMessage, ApiError>;

    async fn clear_history(&self, run_id: RunId) -> Result<(), ApiError>;

    /// Streaming ask.
    async fn open_stream(&self, run_id: RunId, question: &str) -> Result<ChatEvents, ApiError>;
}

#[derive(Clone)]
pub struct HttpChatBackend {
    client: ApiClient,
}

impl HttpChatBackend {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn history(&self, run_id: RunId) -> Result<Vec<HistoryMessage>, ApiError> {
        let history: ConversationHistory = self
            .client
            .request_json(&ApiRequest::get(endpoints::chat(run_id)))
            .await?;
        Ok(history.messages)
    }

    async fn ask(&self, run_id: RunId, question: &str) -> Result<HistoryMessage, ApiError> {
        let req = ApiRequest::post(endpoints::chat(run_id)).json(serde_json::json!({ "question": question }));
        self.client.request_json(&req).await
    }

    async fn clear_history(&self, run_id: RunId) -> Result<(), ApiError> {
        let _: Option<serde_json::Value> = self
            .client
            .request_json(&ApiRequest::delete(endpoints::chat(run_id)))
            .await?;
        Ok(())
    }

    async fn open_stream(&self, run_id: RunId, question: &str) -> Result<ChatEvents, ApiError> {
        open_chat_stream(&self.client, run_id, question).await
    }
}
