//! Run chat: wire protocol, message model, stream decoding and the per-run session controller.

mod backend;
mod controller;
pub mod conversation;
pub mod message;
pub mod protocol;
pub mod stream;

pub use backend::{ChatBackend, HttpChatBackend};
pub use controller::{ChatSession, ErrorNotice, CONNECTION_FAILED, NO_ANSWER};
pub use conversation::{Conversation, MessageRef};
pub use message::{AgentStatus, AgentStep, Message, MessageId, MessageStatus, TablePreviewState};
pub use protocol::{AnswerContent, ChatEvent, ConversationHistory, HistoryMessage, Role};
pub use stream::{stream_chat, ChatEvents, StreamCallbacks};
