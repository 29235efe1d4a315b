//! Session controller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// The logged-in user, or nobody.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_name: String,
}

impl Session {
    /// Whether someone is logged in.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.user_name.is_empty()
    }
}

/// Owns the current user name and notifies subscribers on every change.
///
/// Cloning yields another handle to the same session.
#[derive(Debug, Clone)]
pub struct SessionController {
    inner: Arc<watch::Sender<Session>>,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    /// Create a logged-out session.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Session::default());
        Self {
            inner: Arc::new(tx),
        }
    }

    /// Store the user name and notify subscribers.
    ///
    /// The name is stored as given. An empty name logs out.
    pub fn set_user_name(&self, name: impl Into<String>) {
        let name = name.into();
        info!(user = %name, "session user set");
        self.inner.send_replace(Session { user_name: name });
    }

    /// Log out and notify subscribers.
    pub fn clear(&self) {
        info!("session cleared");
        self.inner.send_replace(Session::default());
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn current(&self) -> Session {
        self.inner.borrow().clone()
    }

    /// Current user name, empty when logged out.
    #[must_use]
    pub fn user_name(&self) -> String {
        self.inner.borrow().user_name.clone()
    }

    /// Receive every subsequent change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.subscribe()
    }
}
