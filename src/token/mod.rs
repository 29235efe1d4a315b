//! Access token providers.
//!
//! The reconciliation core asks a [`TokenProvider`] for a fresh token every
//! time it (re)connects and whenever the client warns that the current token
//! is about to expire.

mod http;

pub use http::HttpTokenProvider;

use async_trait::async_trait;

use crate::error::{ChatError, Result};

/// Issues access tokens for a user name.
#[async_trait]
pub trait TokenProvider: Send + Sync + std::fmt::Debug {
    /// Fetch a token for `user_name`.
    ///
    /// Failures are reported as [`ChatError::TokenFetch`].
    async fn fetch_token(&self, user_name: &str) -> Result<String>;
}

/// Hands out the same token for every user. Useful offline.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self, user_name: &str) -> Result<String> {
        if user_name.is_empty() {
            return Err(ChatError::TokenFetch("user name is empty".into()));
        }
        Ok(self.token.clone())
    }
}
