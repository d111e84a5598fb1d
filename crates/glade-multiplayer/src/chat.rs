//! Bounded room chat: validation, server timestamps, and a FIFO backlog.
//!
//! The room validates each message with [`ChatLog::post`], which trims the
//! text, stamps it with the server clock, and appends it to a backlog that
//! keeps only the newest [`ChatConfig::history_limit`] entries. Rejected
//! messages are dropped without notifying anyone.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Sender name used for room announcements.
pub const SYSTEM_SENDER: &str = "System";

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

/// A validated, server-stamped chat message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    /// Display name of the sender, or [`SYSTEM_SENDER`].
    pub sender: String,
    /// Trimmed text content.
    pub content: String,
    /// Wall-clock timestamp (Unix milliseconds, server clock).
    pub timestamp: u64,
}

impl ChatMessage {
    /// Whether the room itself posted this message.
    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }
}

// ---------------------------------------------------------------------------
// ChatConfig
// ---------------------------------------------------------------------------

/// Chat rules for one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatConfig {
    /// Maximum message length in characters, after trimming.
    pub max_message_length: usize,
    /// Number of messages retained in the backlog.
    pub history_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 100,
            history_limit: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// ChatRejection
// ---------------------------------------------------------------------------

/// Reason a chat message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChatRejection {
    /// Message is empty or whitespace-only.
    #[error("message is empty")]
    Empty,
    /// Message exceeds [`ChatConfig::max_message_length`].
    #[error("message is {length} characters, limit is {max}")]
    TooLong {
        /// Length after trimming.
        length: usize,
        /// Configured limit.
        max: usize,
    },
}

// ---------------------------------------------------------------------------
// ChatLog
// ---------------------------------------------------------------------------

/// Oldest-first chat backlog with a fixed capacity.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    config: ChatConfig,
    messages: VecDeque<ChatMessage>,
}

impl ChatLog {
    /// Creates an empty log with the given rules.
    pub fn new(config: ChatConfig) -> Self {
        Self {
            config,
            messages: VecDeque::with_capacity(config.history_limit),
        }
    }

    /// Validates and records a participant message. Returns the stored
    /// message for broadcast.
    pub fn post(
        &mut self,
        sender: &str,
        content: &str,
        now_ms: u64,
    ) -> Result<ChatMessage, ChatRejection> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ChatRejection::Empty);
        }
        let length = trimmed.chars().count();
        if length > self.config.max_message_length {
            return Err(ChatRejection::TooLong {
                length,
                max: self.config.max_message_length,
            });
        }
        Ok(self.push(ChatMessage {
            sender: sender.to_owned(),
            content: trimmed.to_owned(),
            timestamp: now_ms,
        }))
    }

    /// Records a room announcement. Announcements skip length checks.
    pub fn post_system(&mut self, content: impl Into<String>, now_ms: u64) -> ChatMessage {
        self.push(ChatMessage {
            sender: SYSTEM_SENDER.to_owned(),
            content: content.into(),
            timestamp: now_ms,
        })
    }

    fn push(&mut self, message: ChatMessage) -> ChatMessage {
        self.messages.push_back(message.clone());
        while self.messages.len() > self.config.history_limit {
            self.messages.pop_front();
        }
        message
    }

    /// Retained messages, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    /// Number of retained messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing has been posted.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Replaces the backlog, used when a client receives a welcome snapshot.
    pub fn replace(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.messages.clear();
        for message in messages {
            self.push(message);
        }
    }

    /// Appends an already-validated message, used on the client side.
    pub fn record(&mut self, message: ChatMessage) {
        self.push(message);
    }

    /// Drops every message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
