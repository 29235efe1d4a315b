//! Conversations client boundary.
//!
//! The realtime connection, message delivery and presence live in a vendor
//! SDK. This module describes the slice of that SDK the reconciliation core
//! talks to, as a set of async traits:
//!
//! - [`ClientConnector`]: constructs a client from an access token
//! - [`ConversationsClient`]: a connected client (listing, lookup, creation)
//! - [`Conversation`]: per-conversation operations
//!
//! Events are delivered over a single [`EventStream`] that the caller takes
//! once per client with [`ConversationsClient::subscribe`].
//!
//! [`memory::InMemoryBackend`] implements the whole boundary in-process.

pub mod memory;
mod types;

pub use types::{
    ClientEvent, ConnectionState, CreateConversationOptions, Message, Participant, User,
};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

/// Error returned by the vendor client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdkError {
    /// The requested user or conversation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service refused the operation.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Network or transport failure.
    #[error("transport: {0}")]
    Transport(String),

    /// The client was shut down.
    #[error("client is shut down")]
    Closed,
}

/// Stream of client events. Closed when listeners are removed.
pub type EventStream = mpsc::UnboundedReceiver<ClientEvent>;

/// Shared handle to a conversation.
pub type ConversationRef = Arc<dyn Conversation>;

/// Shared handle to a connected client.
pub type ClientRef = Arc<dyn ConversationsClient>;

/// A conversation as seen by the logged-in user.
#[async_trait]
pub trait Conversation: Send + Sync + fmt::Debug {
    /// Opaque, stable conversation id.
    fn sid(&self) -> &str;

    fn friendly_name(&self) -> Option<String>;

    fn date_created(&self) -> Option<DateTime<Utc>>;

    /// Read marker of the logged-in user, `None` if never read.
    fn last_read_message_index(&self) -> Option<u64>;

    async fn join(&self) -> Result<(), SdkError>;

    /// Add another user as participant.
    async fn add(&self, identity: &str) -> Result<(), SdkError>;

    /// Clear the read marker so every message counts as unread.
    async fn set_all_messages_unread(&self) -> Result<(), SdkError>;

    async fn unread_messages_count(&self) -> Result<Option<u64>, SdkError>;

    /// Fetch up to `page_size` messages, newest last, ending at `anchor`
    /// (inclusive). `None` fetches the most recent page.
    async fn get_messages(
        &self,
        page_size: usize,
        anchor: Option<u64>,
    ) -> Result<Vec<Message>, SdkError>;

    /// Send a message and return its index.
    async fn send_message(&self, body: &str) -> Result<u64, SdkError>;

    async fn update_last_read_message_index(&self, index: u64) -> Result<(), SdkError>;
}

/// A connected conversations client.
#[async_trait]
pub trait ConversationsClient: Send + Sync + fmt::Debug {
    /// Take the event stream. Returns `None` if it was already taken.
    fn subscribe(&self) -> Option<EventStream>;

    async fn update_token(&self, token: &str) -> Result<(), SdkError>;

    async fn subscribed_conversations(&self) -> Result<Vec<ConversationRef>, SdkError>;

    async fn get_user(&self, identity: &str) -> Result<User, SdkError>;

    async fn create_conversation(
        &self,
        options: CreateConversationOptions,
    ) -> Result<ConversationRef, SdkError>;

    /// Detach every event listener at once. The event stream ends.
    fn remove_all_listeners(&self);

    /// Release the connection. Safe to call more than once.
    async fn shutdown(&self);
}

/// Constructs clients for a user from an access token.
#[async_trait]
pub trait ClientConnector: Send + Sync + fmt::Debug {
    async fn connect(&self, identity: &str, token: &str) -> Result<ClientRef, SdkError>;
}
