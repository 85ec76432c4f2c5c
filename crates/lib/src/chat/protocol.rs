//! Chat wire types: persisted history, synchronous replies and stream events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Tolerates `null` where a list is expected.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Payload of an `answer` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerContent {
    #[serde(default)]
    pub answer: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub citations: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub notes: Vec<String>,
    #[serde(default)]
    pub metric_key: Option<String>,
    /// 0–100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_url: Option<String>,
}

/// One line of the chat stream, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Status {
        step: String,
        #[serde(default)]
        message: String,
    },
    Answer {
        content: AnswerContent,
    },
    Error {
        message: String,
    },
    MessageId {
        id: i64,
    },
}

/// A persisted message (`GET /runs/{id}/chat/`), also the body of a synchronous ask reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    #[serde(default)]
    pub id: Option<i64>,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub citations: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub notes: Vec<String>,
    #[serde(default)]
    pub metric_key: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub confidence_explanation: Option<String>,
    #[serde(default)]
    pub table_url: Option<String>,
    #[serde(default)]
    pub plot_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl HistoryMessage {
    /// The answer part of a reply; the backend stores an absent explanation as "".
    pub fn answer(&self) -> AnswerContent {
        AnswerContent {
            answer: self.content.clone(),
            citations: self.citations.clone(),
            notes: self.notes.clone(),
            metric_key: self.metric_key.clone(),
            confidence: self.confidence,
            confidence_explanation: self
                .confidence_explanation
                .clone()
                .filter(|s| !s.is_empty()),
            table_url: self.table_url.clone(),
            plot_url: self.plot_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationHistory {
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_event_type() {
        let ev: ChatEvent =
            serde_json::from_str(r#"{"type":"status","step":"load","message":"Loading"}"#).unwrap();
        assert_eq!(
            ev,
            ChatEvent::Status {
                step: "load".to_string(),
                message: "Loading".to_string()
            }
        );

        let ev: ChatEvent = serde_json::from_str(
            r#"{"type":"answer","content":{"answer":"Hi","citations":[],"notes":[],"metric_key":null}}"#,
        )
        .unwrap();
        let ChatEvent::Answer { content } = ev else {
            panic!("expected answer");
        };
        assert_eq!(content.answer, "Hi");
        assert!(content.confidence.is_none());

        let ev: ChatEvent = serde_json::from_str(r#"{"type":"error","message":"nope"}"#).unwrap();
        assert_eq!(ev, ChatEvent::Error { message: "nope".to_string() });

        let ev: ChatEvent = serde_json::from_str(r#"{"type":"message_id","id":42}"#).unwrap();
        assert_eq!(ev, ChatEvent::MessageId { id: 42 });
    }

    #[test]
    fn unknown_event_type_is_an_error() {
        assert!(serde_json::from_str::<ChatEvent>(r#"{"type":"heartbeat"}"#).is_err());
    }

    #[test]
    fn null_lists_become_empty() {
        let content: AnswerContent =
            serde_json::from_str(r#"{"answer":"x","citations":null,"notes":null}"#).unwrap();
        assert!(content.citations.is_empty());
        assert!(content.notes.is_empty());
    }

    #[test]
    fn reply_answer_drops_blank_explanation() {
        let reply: HistoryMessage = serde_json::from_value(serde_json::json!({
            "id": 9,
            "role": "assistant",
            "content": "Example answer",
            "citations": ["module"],
            "notes": ["note"],
            "metric_key": "duplication",
            "confidence": 80,
            "confidence_explanation": "",
            "table_url": "https://example.com/table.csv",
            "plot_url": "https://example.com/plot.png",
            "created_at": "2024-05-01T10:00:00Z",
        }))
        .unwrap();
        let answer = reply.answer();
        assert_eq!(answer.answer, "Example answer");
        assert_eq!(answer.confidence, Some(80.0));
        assert!(answer.confidence_explanation.is_none());
        assert_eq!(answer.table_url.as_deref(), Some("https://example.com/table.csv"));
    }
}
