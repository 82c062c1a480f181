//! Conversation log model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::exchange::core::ids::{ExchangeId, MessageId, SessionId};

/// Author of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// Typed by the user.
    User,
    /// Produced by the assistant.
    Assistant,
}

impl Sender {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a message has been confirmed by a finished exchange.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Part of the confirmed conversation.
    Committed,
    /// Inserted ahead of an exchange that has not finished yet.
    Speculative,
}

/// One turn in a conversation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable identifier.
    pub id: MessageId,
    /// Author.
    pub sender: Sender,
    /// Text content.
    pub content: String,
    /// Creation or last-update instant.
    pub timestamp: DateTime<Utc>,
    /// Confirmation state.
    pub status: MessageStatus,
}

impl Message {
    fn build(sender: Sender, content: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            content: content.into(),
            timestamp: Utc::now(),
            status,
        }
    }

    /// Build a committed user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::build(Sender::User, content, MessageStatus::Committed)
    }

    /// Build a committed assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::build(Sender::Assistant, content, MessageStatus::Committed)
    }

    /// Build a speculative user message.
    #[must_use]
    pub fn speculative_user(content: impl Into<String>) -> Self {
        Self::build(Sender::User, content, MessageStatus::Speculative)
    }

    /// Build an empty speculative assistant message.
    #[must_use]
    pub fn speculative_assistant() -> Self {
        Self::build(Sender::Assistant, String::new(), MessageStatus::Speculative)
    }

    /// Check whether the message is still speculative.
    #[must_use]
    pub fn is_speculative(&self) -> bool {
        self.status == MessageStatus::Speculative
    }
}

/// Exchange that currently owns the speculative pair.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InFlightExchange {
    /// Tag of the exchange.
    pub id: ExchangeId,
    /// Text of the speculative user message, as submitted.
    pub submitted_text: String,
}

/// The conversation aggregate observed by the UI.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    /// Session identifier.
    pub id: SessionId,
    /// Messages in conversation order.
    pub messages: Vec<Message>,
    /// Label of the selected assistant backend.
    pub active_model: String,
    /// Exchange currently in flight, if any.
    pub in_flight: Option<InFlightExchange>,
    /// Id the next exchange will receive.
    pub(crate) next_exchange: ExchangeId,
}

impl ChatSession {
    /// Create an empty session.
    #[must_use]
    pub fn new(id: SessionId, active_model: impl Into<String>) -> Self {
        Self {
            id,
            messages: Vec::new(),
            active_model: active_model.into(),
            in_flight: None,
            next_exchange: ExchangeId::FIRST,
        }
    }

    /// Whether an exchange is currently in flight.
    #[must_use]
    pub const fn is_exchange_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Most recent assistant message, speculative or not.
    #[must_use]
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.sender == Sender::Assistant)
    }

    /// Messages that belong to finished exchanges.
    pub fn committed_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|message| !message.is_speculative())
    }

    /// Number of speculative messages at the tail of the log.
    #[must_use]
    pub fn speculative_tail_len(&self) -> usize {
        self.messages
            .iter()
            .rev()
            .take_while(|message| message.is_speculative())
            .count()
    }
}
