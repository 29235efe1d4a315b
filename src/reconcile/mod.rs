//! State reconciliation between the conversations client and the UI.
//!
//! [`ChatHandle::spawn`] starts a single task that owns the chat list, the
//! message window of the open conversation and the connection lifecycle.
//! It reacts to three inputs:
//!
//! - session changes from the [`SessionController`]
//! - client events from the connected conversations client
//! - user intents sent through the [`ChatHandle`]
//!
//! and publishes a [`ViewState`] snapshot after every change.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chat_sync::conversations::memory::InMemoryBackend;
//! use chat_sync::reconcile::{ChatHandle, ReconcilerSettings};
//! use chat_sync::session::SessionController;
//! use chat_sync::token::StaticTokenProvider;
//!
//! # async fn demo() -> chat_sync::error::Result<()> {
//! let backend = InMemoryBackend::new();
//! let chat = ChatHandle::spawn(
//!     ReconcilerSettings::default(),
//!     SessionController::new(),
//!     Arc::new(StaticTokenProvider::new("token")),
//!     Arc::new(backend.clone()),
//! );
//!
//! chat.login("alice");
//! let view = chat.wait_until(|v| v.connection.is_connected()).await?;
//! println!("{} chats", view.chats.len());
//! chat.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod actor;
mod chat_list;
mod state;
mod window;

pub use chat_list::{ChatList, ConversationMeta};
pub use state::{ConnectionPhase, ConversationSummary, ViewState};
pub use window::MessageWindow;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use self::actor::{ChatCore, Intent};
use crate::config::ChatConfig;
use crate::conversations::ClientConnector;
use crate::error::{ChatError, Result};
use crate::session::SessionController;
use crate::token::TokenProvider;

/// Tunables of the reconciliation core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// Messages per page.
    pub page_size: usize,
    /// How long a transient error stays visible.
    pub error_clear_delay: Duration,
    /// How long a `conversationAdded` event waits before it is judged
    /// against the session start time.
    pub backlog_settle: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            page_size: 30,
            error_clear_delay: Duration::from_secs(2),
            backlog_settle: Duration::from_millis(500),
        }
    }
}

impl From<&ChatConfig> for ReconcilerSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            page_size: config.page_size,
            error_clear_delay: Duration::from_millis(config.error_clear_ms),
            backlog_settle: Duration::from_millis(config.backlog_settle_ms),
        }
    }
}

/// Handle to a running reconciliation core.
///
/// Intents are queued and applied in order. They fail with
/// [`ChatError::Closed`] once the core has stopped.
#[derive(Debug)]
pub struct ChatHandle {
    session: SessionController,
    intents: mpsc::UnboundedSender<Intent>,
    view: watch::Receiver<ViewState>,
    task: JoinHandle<()>,
}

impl ChatHandle {
    /// Start the core on the current tokio runtime.
    ///
    /// If the session already has a user, connecting starts immediately.
    pub fn spawn(
        settings: ReconcilerSettings,
        session: SessionController,
        tokens: Arc<dyn TokenProvider>,
        connector: Arc<dyn ClientConnector>,
    ) -> Self {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(ViewState::default());

        let core = ChatCore::new(settings, tokens, connector, completion_tx, view_tx);
        let task = tokio::spawn(core.run(intent_rx, completion_rx, session.subscribe()));

        Self {
            session,
            intents: intent_tx,
            view: view_rx,
            task,
        }
    }

    /// The session this core follows.
    pub fn session(&self) -> &SessionController {
        &self.session
    }

    /// Log in as `user_name`. Same as setting it on the session.
    pub fn login(&self, user_name: impl Into<String>) {
        self.session.set_user_name(user_name);
    }

    pub fn logout(&self) {
        self.session.clear();
    }

    /// Subscribe to view updates.
    pub fn view(&self) -> watch::Receiver<ViewState> {
        self.view.clone()
    }

    /// Latest published view.
    pub fn snapshot(&self) -> ViewState {
        self.view.borrow().clone()
    }

    /// Wait until the published view satisfies `predicate` and return it.
    pub async fn wait_until<F>(&self, mut predicate: F) -> Result<ViewState>
    where
        F: FnMut(&ViewState) -> bool,
    {
        let mut view = self.view.clone();
        let state = view
            .wait_for(|v| predicate(v))
            .await
            .map_err(|_closed| ChatError::Closed)?;
        Ok(state.clone())
    }

    fn send(&self, intent: Intent) -> Result<()> {
        self.intents.send(intent).map_err(|_closed| ChatError::Closed)
    }

    /// Open a conversation from the chat list.
    pub fn open_chat(&self, sid: impl Into<String>) -> Result<()> {
        self.send(Intent::OpenChat(sid.into()))
    }

    /// Send `text` to the open conversation. The draft is cleared on success.
    pub fn send_message(&self, text: impl Into<String>) -> Result<()> {
        self.send(Intent::SendMessage(text.into()))
    }

    pub fn set_draft(&self, text: impl Into<String>) -> Result<()> {
        self.send(Intent::SetDraft(text.into()))
    }

    pub fn set_new_chat_draft(&self, text: impl Into<String>) -> Result<()> {
        self.send(Intent::SetNewChatDraft(text.into()))
    }

    /// Start a one-to-one conversation with `identity` and open it.
    pub fn create_chat(&self, identity: impl Into<String>) -> Result<()> {
        self.send(Intent::CreateChat(identity.into()))
    }

    /// Load the page before the oldest loaded message.
    pub fn load_older(&self) -> Result<()> {
        self.send(Intent::LoadOlder)
    }

    /// Detach listeners, release the client and stop the core.
    pub async fn shutdown(self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.intents.send(Intent::Dispose(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        let _ = self.task.await;
    }
}
