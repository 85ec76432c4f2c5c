//! Ordered message list with a generation counter.
//!
//! Async handlers address messages through a [`MessageRef`]. Replacing or clearing the
//! list bumps the generation, so refs taken before the reset no longer resolve.

use super::message::{Message, MessageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: MessageId,
    pub generation: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    generation: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pending(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_pending())
    }

    pub fn push(&mut self, message: Message) -> MessageRef {
        let target = MessageRef {
            id: message.id.clone(),
            generation: self.generation,
        };
        self.messages.push(message);
        target
    }

    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.generation += 1;
    }

    pub fn clear(&mut self) {
        self.replace(Vec::new());
    }

    /// Ref to a message currently in the list.
    pub fn reference(&self, id: &str) -> Option<MessageRef> {
        self.messages.iter().any(|m| m.id == id).then(|| MessageRef {
            id: id.to_string(),
            generation: self.generation,
        })
    }

    pub fn get(&self, target: &MessageRef) -> Option<&Message> {
        if target.generation != self.generation {
            return None;
        }
        self.messages.iter().find(|m| m.id == target.id)
    }

    /// Apply `f` to the target if it still exists in this generation. Returns whether anything changed.
    pub fn update<F>(&mut self, target: &MessageRef, f: F) -> bool
    where
        F: FnOnce(&mut Message) -> bool,
    {
        if target.generation != self.generation {
            return false;
        }
        self.messages
            .iter_mut()
            .find(|m| m.id == target.id)
            .map(f)
            .unwrap_or(false)
    }
}
