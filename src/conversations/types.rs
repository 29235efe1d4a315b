//! Data carried across the conversations client boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ConversationRef;

/// A message as delivered by the conversations client.
///
/// Messages are immutable once received. `index` is scoped to the
/// conversation and strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Conversation-scoped sequence number.
    pub index: u64,
    /// Text body.
    pub body: String,
    /// Identity of the author, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Sid of the owning conversation.
    pub conversation_sid: String,
    /// Server timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_created: Option<DateTime<Utc>>,
}

/// A conversation member, as reported by typing events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub identity: String,
    pub conversation_sid: String,
}

/// A user known to the conversations service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub identity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
}

/// Options for creating a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConversationOptions {
    pub friendly_name: Option<String>,
}

/// Transport state reported by the vendor client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Denied,
    Unknown,
}

/// Events emitted by a conversations client.
///
/// Lifecycle events describe the connection; the rest are domain events.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Initialized,
    InitFailed { error: String },
    ConnectionStateChanged(ConnectionState),
    ConnectionError { error: String },
    TokenAboutToExpire,
    TokenExpired,
    ConversationAdded(ConversationRef),
    MessageAdded(Message),
    TypingStarted(Participant),
    TypingEnded(Participant),
}

impl ClientEvent {
    /// Stable event name, used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::InitFailed { .. } => "initFailed",
            Self::ConnectionStateChanged(_) => "connectionStateChanged",
            Self::ConnectionError { .. } => "connectionError",
            Self::TokenAboutToExpire => "tokenAboutToExpire",
            Self::TokenExpired => "tokenExpired",
            Self::ConversationAdded(_) => "conversationAdded",
            Self::MessageAdded(_) => "messageAdded",
            Self::TypingStarted(_) => "typingStarted",
            Self::TypingEnded(_) => "typingEnded",
        }
    }
}
