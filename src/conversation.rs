//! Conversation history shared between client and server
//!
//! The history is append-only: each completed turn adds exactly one
//! user message followed by one assistant message.

use serde::{Deserialize, Serialize};

use crate::voice::AudioClip;

/// Speaker of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire name used by chat completion APIs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single conversation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Round-trip latency of the turn that produced this message, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl Message {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            latency_ms: None,
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            latency_ms: None,
        }
    }
}

/// Ordered, append-only conversation history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Rebuild a history received over the wire
    ///
    /// Order is preserved exactly as given.
    #[must_use]
    pub const fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Append a completed turn
    pub fn push_turn(
        &mut self,
        transcript: impl Into<String>,
        response: impl Into<String>,
        latency_ms: Option<u64>,
    ) {
        self.messages.push(Message::user(transcript));
        self.messages.push(Message {
            latency_ms,
            ..Message::assistant(response)
        });
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Latency of the most recent assistant reply
    #[must_use]
    pub fn last_latency_ms(&self) -> Option<u64> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .and_then(|m| m.latency_ms)
    }
}

/// What the user said in one turn: recorded audio or typed text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    Audio(AudioClip),
    Text(String),
}
