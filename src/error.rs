//! Error types for the chat client core.

use thiserror::Error;

use crate::conversations::SdkError;

/// Error raised by the reconciliation core and its collaborators.
///
/// None of these are fatal to the core itself: each one is caught where the
/// failing operation runs and turned into a log line or a transient UI error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Fetching an access token failed (network, unknown user, bad payload).
    #[error("token fetch failed: {0}")]
    TokenFetch(String),

    /// The conversations client could not be constructed or initialized.
    #[error("client initialization failed: {0}")]
    ClientInit(String),

    /// The client reported a terminal connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// The target of a create-chat request does not exist.
    #[error("User not found in Twilio")]
    UserNotFound {
        /// Identity that was looked up.
        identity: String,
    },

    /// Sending a message was rejected.
    #[error("send failed: {0}")]
    SendFailure(#[source] SdkError),

    /// A message page or the chat list could not be fetched.
    #[error("fetch failed: {0}")]
    FetchFailure(#[source] SdkError),

    /// A step of the create-chat sequence failed. Earlier steps stay applied.
    #[error("create chat failed at {step}: {source}")]
    CreateFailure {
        step: &'static str,
        #[source]
        source: SdkError,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The reconciliation core is no longer running.
    #[error("chat core has stopped")]
    Closed,
}

impl ChatError {
    /// Text shown to the user for errors that surface in the view.
    #[must_use]
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

/// Result alias for chat operations.
pub type Result<T> = std::result::Result<T, ChatError>;
