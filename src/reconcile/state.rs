//! View state published to the UI layer.

use serde::Serialize;

use crate::conversations::{ConnectionState, Message};

/// Where the connection lifecycle stands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    /// Fetching a token and constructing the client.
    Connecting,
    Connected,
    /// Still connected; a fresh token is being fetched.
    TokenRefreshing,
    /// Terminal until the user logs in again.
    Failed { reason: String },
}

impl ConnectionPhase {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::TokenRefreshing)
    }
}

/// One row of the chat list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    /// Conversation sid.
    pub id: String,
    pub friendly_name: Option<String>,
    pub unread_count: u64,
    pub last_message_preview: String,
}

/// Everything the UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewState {
    /// Logged-in user, empty when logged out.
    pub user_name: String,
    pub connection: ConnectionPhase,
    /// Last transport state reported by the client.
    pub vendor_state: Option<ConnectionState>,
    /// Chat list, newest-created first for live additions.
    pub chats: Vec<ConversationSummary>,
    /// Sid of the open conversation.
    pub current_conversation: Option<String>,
    /// Message window of the open conversation, oldest first.
    pub messages: Vec<Message>,
    /// Compose buffer.
    pub draft: String,
    /// New-chat input field.
    pub new_chat_draft: String,
    /// Transient error text.
    pub error: Option<String>,
    pub is_loading: bool,
    /// Someone is typing in the open conversation.
    pub is_typing: bool,
}

impl ViewState {
    /// Chat-list row for a conversation.
    #[must_use]
    pub fn chat(&self, id: &str) -> Option<&ConversationSummary> {
        self.chats.iter().find(|c| c.id == id)
    }

    /// Indexes of the loaded messages, oldest first.
    #[must_use]
    pub fn message_indexes(&self) -> Vec<u64> {
        self.messages.iter().map(|m| m.index).collect()
    }
}
