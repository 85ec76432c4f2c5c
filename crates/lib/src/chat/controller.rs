//! Per-run chat session: owns the conversation, the composer gate and all background work.
//!
//! Submissions, history previews and stream handlers run as tasks in a [`JoinSet`] owned by
//! the session. They reach messages only through a [`MessageRef`], so a clear or reload makes
//! them no-ops. Every task also watches the session's close signal, so
//! [`ChatSession::close`] stops them even while [`ChatSession::settle`] is draining the set.
//! Dropping the session aborts every task.

use super::backend::ChatBackend;
use super::conversation::{Conversation, MessageRef};
use super::message::{Message, TablePreviewState};
use super::protocol::ChatEvent;
use crate::api::endpoints::{self, RunId};
use crate::api::ApiError;
use crate::config::BackendFlavor;
use crate::table::{load_preview, ArtifactFetcher};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinSet;

/// Message set on an answer whose transport failed.
pub const CONNECTION_FAILED: &str = "Connection to agent failed";

/// Message set when the stream ends before an answer or error arrives.
pub const NO_ANSWER: &str = "Agent finished without an answer";

/// Session-wide failure for the host to surface (status 0 when no HTTP status is known).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorNotice {
    pub status: u16,
    pub endpoint: String,
    pub message: String,
    pub detail: Option<Value>,
}

impl ErrorNotice {
    fn from_api(err: &ApiError, endpoint: String) -> Self {
        Self {
            status: err.status().unwrap_or(0),
            endpoint,
            message: err.to_string(),
            detail: err.detail().cloned(),
        }
    }
}

#[derive(Debug, Default)]
struct ChatState {
    conversation: Conversation,
    draft: String,
    enabled: bool,
    in_flight: bool,
    deleting: bool,
    closed: bool,
}

struct Shared {
    run_id: Option<RunId>,
    flavor: BackendFlavor,
    backend: Arc<dyn ChatBackend>,
    artifacts: Arc<dyn ArtifactFetcher>,
    state: RwLock<ChatState>,
    notices: broadcast::Sender<ErrorNotice>,
}

pub struct ChatSession {
    shared: Arc<Shared>,
    tasks: Mutex<JoinSet<()>>,
    closing: watch::Sender<bool>,
}

impl ChatSession {
    /// A session for `run_id` (None when the host has no valid run). Starts enabled.
    pub fn new(
        run_id: Option<RunId>,
        flavor: BackendFlavor,
        backend: Arc<dyn ChatBackend>,
        artifacts: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        let (notices, _) = broadcast::channel(16);
        let (closing, _) = watch::channel(false);
        let state = ChatState {
            enabled: true,
            ..Default::default()
        };
        Self {
            shared: Arc::new(Shared {
                run_id,
                flavor,
                backend,
                artifacts,
                state: RwLock::new(state),
                notices,
            }),
            tasks: Mutex::new(JoinSet::new()),
            closing,
        }
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.shared.run_id
    }

    pub fn flavor(&self) -> BackendFlavor {
        self.shared.flavor
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorNotice> {
        self.shared.notices.subscribe()
    }

    /// Snapshot of the conversation.
    pub async fn messages(&self) -> Vec<Message> {
        self.shared.state.read().await.conversation.messages().to_vec()
    }

    pub async fn message(&self, id: &str) -> Option<Message> {
        let state = self.shared.state.read().await;
        state.conversation.messages().iter().find(|m| m.id == id).cloned()
    }

    pub async fn draft(&self) -> String {
        self.shared.state.read().await.draft.clone()
    }

    pub async fn set_draft(&self, text: impl Into<String>) {
        self.shared.state.write().await.draft = text.into();
    }

    pub async fn set_enabled(&self, enabled: bool) {
        self.shared.state.write().await.enabled = enabled;
    }

    pub async fn is_submitting(&self) -> bool {
        self.shared.state.read().await.in_flight
    }

    pub async fn is_deleting(&self) -> bool {
        self.shared.state.read().await.deleting
    }

    /// True when not enabled, without a run, closed, or while a submission is in flight.
    pub async fn composer_disabled(&self) -> bool {
        let state = self.shared.state.read().await;
        self.shared.composer_disabled(&state)
    }

    /// Replace the conversation with the persisted history and start previews for its tables.
    pub async fn load_history(&self) -> Result<(), ApiError> {
        let Some(run_id) = self.shared.run_id else {
            return Ok(());
        };
        let history = match self.shared.backend.history(run_id).await {
            Ok(history) => history,
            Err(e) => {
                log::warn!("loading chat history for run {} failed: {}", run_id, e);
                self.shared.notify(ErrorNotice::from_api(&e, endpoints::chat(run_id)));
                return Err(e);
            }
        };

        let previews: Vec<(MessageRef, String)> = {
            let mut state = self.shared.state.write().await;
            if state.closed {
                return Ok(());
            }
            state
                .conversation
                .replace(history.into_iter().map(Message::from_history).collect());
            let generation = state.conversation.generation();
            state
                .conversation
                .messages()
                .iter()
                .filter_map(|m| {
                    let url = m.table_url.clone()?;
                    Some((
                        MessageRef {
                            id: m.id.clone(),
                            generation,
                        },
                        url,
                    ))
                })
                .collect()
        };
        log::debug!("loaded chat history for run {}", run_id);

        for (target, url) in previews {
            let shared = self.shared.clone();
            self.spawn(async move { shared.preview(&target, &url).await });
        }
        Ok(())
    }

    /// Ask `question`. Returns false (and changes nothing) when the composer is disabled or the
    /// question is blank; otherwise the answer is produced in the background.
    pub async fn submit(&self, question: &str) -> bool {
        let question = question.trim();
        if question.is_empty() {
            return false;
        }
        let (run_id, target) = {
            let mut state = self.shared.state.write().await;
            let run_id = match self.shared.run_id {
                Some(id) if !self.shared.composer_disabled(&state) => id,
                _ => return false,
            };
            let track_progress = self.shared.flavor == BackendFlavor::Stream;
            state.conversation.push(Message::user(question));
            let target = state
                .conversation
                .push(Message::pending_assistant(track_progress));
            state.draft.clear();
            state.in_flight = true;
            (run_id, target)
        };

        let shared = self.shared.clone();
        let question = question.to_string();
        self.spawn(async move { shared.answer(run_id, target, question).await });
        true
    }

    /// Submit the current draft.
    pub async fn submit_draft(&self) -> bool {
        let draft = self.draft().await;
        self.submit(&draft).await
    }

    /// Delete the persisted conversation; the local one is cleared only if the backend agrees.
    pub async fn delete_history(&self) -> Result<(), ApiError> {
        let Some(run_id) = self.shared.run_id else {
            return Ok(());
        };
        self.shared.state.write().await.deleting = true;
        let result = self.shared.backend.clear_history(run_id).await;

        let mut state = self.shared.state.write().await;
        state.deleting = false;
        match result {
            Ok(()) => {
                if !state.closed {
                    state.conversation.clear();
                }
                log::debug!("cleared chat history for run {}", run_id);
                Ok(())
            }
            Err(e) => {
                drop(state);
                log::warn!("clearing chat history for run {} failed: {}", run_id, e);
                self.shared.notify(ErrorNotice::from_api(&e, endpoints::chat(run_id)));
                Err(e)
            }
        }
    }

    /// (Re)load the table preview of a message. Returns false if it has no table.
    pub async fn load_preview(&self, message_id: &str) -> bool {
        let found = {
            let state = self.shared.state.read().await;
            state.conversation.reference(message_id).and_then(|target| {
                let url = state.conversation.get(&target)?.table_url.clone()?;
                Some((target, url))
            })
        };
        match found {
            Some((target, url)) => {
                self.shared.preview(&target, &url).await;
                true
            }
            None => false,
        }
    }

    /// Wait until every background task has finished, including ones spawned meanwhile.
    pub async fn settle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.lock_tasks());
            if tasks.is_empty() {
                return;
            }
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    if e.is_panic() {
                        log::error!("chat task panicked: {}", e);
                    }
                }
            }
        }
    }

    /// Stop all background work. Nothing updates the conversation afterwards.
    pub async fn close(&self) {
        self.shared.state.write().await.closed = true;
        // Reaches tasks that settle() has already taken out of the set.
        self.closing.send_replace(true);
        self.lock_tasks().abort_all();
        log::debug!("chat session closed");
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut closing = self.closing.subscribe();
        self.lock_tasks().spawn(async move {
            tokio::select! {
                _ = task => {}
                _ = closing.wait_for(|closed| *closed) => {}
            }
        });
    }

    fn lock_tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Shared {
    fn composer_disabled(&self, state: &ChatState) -> bool {
        !state.enabled || self.run_id.is_none() || state.in_flight || state.closed
    }

    fn notify(&self, notice: ErrorNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    async fn update<F>(&self, target: &MessageRef, f: F) -> bool
    where
        F: FnOnce(&mut Message) -> bool,
    {
        let mut state = self.state.write().await;
        if state.closed {
            return false;
        }
        state.conversation.update(target, f)
    }

    /// One submission from placeholder to terminal state, then its table preview.
    async fn answer(&self, run_id: RunId, target: MessageRef, question: String) {
        match self.flavor {
            BackendFlavor::Stream => self.stream_answer(run_id, &target, &question).await,
            BackendFlavor::Sync => self.sync_answer(run_id, &target, &question).await,
        }

        let table_url = {
            let mut state = self.state.write().await;
            state.in_flight = false;
            state
                .conversation
                .get(&target)
                .and_then(|m| m.table_url.clone())
        };
        if let Some(url) = table_url {
            self.preview(&target, &url).await;
        }
    }

    async fn stream_answer(&self, run_id: RunId, target: &MessageRef, question: &str) {
        let mut events = match self.backend.open_stream(run_id, question).await {
            Ok(events) => events,
            Err(e) => return self.connection_failed(run_id, target, &e).await,
        };
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if !self.apply(target, event).await {
                        log::debug!("dropped chat event for inactive message {}", target.id);
                    }
                }
                Err(e) => return self.connection_failed(run_id, target, &e).await,
            }
        }
        if self.update(target, |m| m.fail(NO_ANSWER)).await {
            log::warn!("chat stream for run {} ended without an answer", run_id);
        }
    }

    async fn apply(&self, target: &MessageRef, event: ChatEvent) -> bool {
        match event {
            ChatEvent::Status { step, message } => {
                self.update(target, |m| m.record_status(&step, &message)).await
            }
            ChatEvent::Answer { content } => self.update(target, |m| m.complete(content)).await,
            ChatEvent::Error { message } => self.update(target, |m| m.fail(message)).await,
            ChatEvent::MessageId { id } => self.update(target, |m| m.set_server_id(id)).await,
        }
    }

    async fn connection_failed(&self, run_id: RunId, target: &MessageRef, err: &ApiError) {
        if !self.update(target, |m| m.fail(CONNECTION_FAILED)).await {
            log::debug!("chat stream for run {} failed after its message settled: {}", run_id, err);
            return;
        }
        log::warn!("chat stream for run {} failed: {}", run_id, err);
        self.notify(ErrorNotice::from_api(err, endpoints::chat_stream(run_id)));
    }

    async fn sync_answer(&self, run_id: RunId, target: &MessageRef, question: &str) {
        match self.backend.ask(run_id, question).await {
            Ok(reply) => {
                let answer = reply.answer();
                self.update(target, |m| {
                    if let Some(id) = reply.id {
                        m.set_server_id(id);
                    }
                    m.complete(answer)
                })
                .await;
            }
            Err(e) => {
                log::warn!("chat request for run {} failed: {}", run_id, e);
                self.update(target, |m| m.fail(e.to_string())).await;
                self.notify(ErrorNotice::from_api(&e, endpoints::chat(run_id)));
            }
        }
    }

    /// Loading, then ready or error. Never touches the message's own status.
    async fn preview(&self, target: &MessageRef, url: &str) {
        if !self
            .update(target, |m| m.set_table_preview(TablePreviewState::Loading))
            .await
        {
            return;
        }
        let state = match load_preview(self.artifacts.as_ref(), url).await {
            Ok(preview) => TablePreviewState::Ready { preview },
            Err(e) => {
                log::warn!("table preview for message {} failed: {}", target.id, e);
                TablePreviewState::Error {
                    message: e.to_string(),
                }
            }
        };
        self.update(target, |m| m.set_table_preview(state)).await;
    }
}
