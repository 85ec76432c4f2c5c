//! Client-side message model and its state transitions.
//!
//! A message is `pending` until an answer or error arrives; `complete` and `error` are
//! terminal. Every mutator returns whether it applied, so late events are visible no-ops.

use super::protocol::{AnswerContent, HistoryMessage, Role};
use crate::table::TablePreview;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

pub type MessageId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Complete,
    Error,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MessageStatus::Pending)
    }
}

/// Backend processing phases reported while an answer is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStep {
    Load,
    Index,
    Analyze,
    Table,
    Plot,
    Synthesize,
}

impl AgentStep {
    pub const ALL: [AgentStep; 6] = [
        AgentStep::Load,
        AgentStep::Index,
        AgentStep::Analyze,
        AgentStep::Table,
        AgentStep::Plot,
        AgentStep::Synthesize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentStep::Load => "load",
            AgentStep::Index => "index",
            AgentStep::Analyze => "analyze",
            AgentStep::Table => "table",
            AgentStep::Plot => "plot",
            AgentStep::Synthesize => "synthesize",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.as_str() == s)
    }
}

impl fmt::Display for AgentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a pending assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub current_step: Option<AgentStep>,
    /// Insertion-ordered, duplicate-free; only ever grows.
    pub completed_steps: Vec<AgentStep>,
    pub message: String,
}

impl AgentStatus {
    pub fn initializing() -> Self {
        Self {
            current_step: None,
            completed_steps: Vec::new(),
            message: "Initializing...".to_string(),
        }
    }

    /// Apply one status event. Unknown step names only update the progress text.
    pub fn record(&mut self, step: &str, message: &str) {
        match AgentStep::parse(step) {
            Some(step) => {
                if !self.completed_steps.contains(&step) {
                    self.completed_steps.push(step);
                }
                self.current_step = Some(step);
            }
            None => log::debug!("unknown agent step {:?}", step),
        }
        self.message = message.to_string();
    }
}

/// Lifecycle of a table preview, independent of the owning message's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TablePreviewState {
    Loading,
    Ready { preview: TablePreview },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    /// Id assigned by the backend once the message is persisted.
    pub server_id: Option<i64>,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    pub citations: Vec<String>,
    pub notes: Vec<String>,
    pub metric_key: Option<String>,
    pub confidence: Option<f64>,
    pub confidence_explanation: Option<String>,
    pub table_url: Option<String>,
    pub plot_url: Option<String>,
    pub agent_status: Option<AgentStatus>,
    pub table_preview: Option<TablePreviewState>,
    pub error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

fn new_message_id() -> MessageId {
    uuid::Uuid::new_v4().to_string()
}

impl Message {
    fn blank(role: Role, status: MessageStatus) -> Self {
        Self {
            id: new_message_id(),
            server_id: None,
            role,
            content: String::new(),
            status,
            citations: Vec::new(),
            notes: Vec::new(),
            metric_key: None,
            confidence: None,
            confidence_explanation: None,
            table_url: None,
            plot_url: None,
            agent_status: None,
            table_preview: None,
            error: None,
            created_at: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::blank(Role::User, MessageStatus::Complete)
        }
    }

    /// Placeholder for the answer being produced. Streaming answers start with progress tracking.
    pub fn pending_assistant(track_progress: bool) -> Self {
        Self {
            agent_status: track_progress.then(AgentStatus::initializing),
            ..Self::blank(Role::Assistant, MessageStatus::Pending)
        }
    }

    /// Persisted messages are always complete. The server id doubles as the local id.
    pub fn from_history(msg: HistoryMessage) -> Self {
        let answer = msg.answer();
        Self {
            id: msg.id.map(|id| id.to_string()).unwrap_or_else(new_message_id),
            server_id: msg.id,
            content: answer.answer,
            citations: answer.citations,
            notes: answer.notes,
            metric_key: answer.metric_key,
            confidence: answer.confidence,
            confidence_explanation: answer.confidence_explanation,
            table_url: answer.table_url,
            plot_url: answer.plot_url,
            created_at: msg.created_at,
            ..Self::blank(msg.role, MessageStatus::Complete)
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }

    pub fn record_status(&mut self, step: &str, message: &str) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.agent_status
            .get_or_insert_with(AgentStatus::initializing)
            .record(step, message);
        true
    }

    /// Record the persisted id. The backend sends it after the answer, so this also applies to
    /// finished messages, but only once.
    pub fn set_server_id(&mut self, id: i64) -> bool {
        if self.server_id.is_some() {
            return false;
        }
        self.server_id = Some(id);
        true
    }

    /// Finalize with the delivered answer. Artifact links only overwrite when present.
    pub fn complete(&mut self, answer: AnswerContent) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = MessageStatus::Complete;
        self.content = answer.answer;
        self.citations = answer.citations;
        self.notes = answer.notes;
        self.metric_key = answer.metric_key;
        self.confidence = answer.confidence;
        self.confidence_explanation = answer.confidence_explanation;
        if answer.table_url.is_some() {
            self.table_url = answer.table_url;
        }
        if answer.plot_url.is_some() {
            self.plot_url = answer.plot_url;
        }
        self.agent_status = None;
        self.error = None;
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = MessageStatus::Error;
        self.error = Some(error.into());
        self.agent_status = None;
        true
    }

    /// Previews only exist for messages that reference a table.
    pub fn set_table_preview(&mut self, state: TablePreviewState) -> bool {
        if self.table_url.is_none() {
            return false;
        }
        self.table_preview = Some(state);
        true
    }
}
