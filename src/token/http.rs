//! Token provider backed by the local token endpoint.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use super::TokenProvider;
use crate::config::TokenConfig;
use crate::error::{ChatError, Result};

/// Fetches tokens with `GET {base_url}/getToken?userName=<name>`.
///
/// The endpoint may answer with a bare string, a JSON string, or a JSON
/// object carrying a `token` field.
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
    endpoint: Url,
    http: reqwest::Client,
}

impl HttpTokenProvider {
    /// Create a provider for the given base URL (e.g. `http://localhost:3000`).
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("cannot build HTTP client: {e}")))?;
        Self::with_client(base_url, http)
    }

    /// Create a provider with a custom reqwest client.
    pub fn with_client(base_url: impl AsRef<str>, http: reqwest::Client) -> Result<Self> {
        let endpoint = token_endpoint(base_url.as_ref())?;
        Ok(Self { endpoint, http })
    }

    /// Create a provider from configuration.
    pub fn from_config(config: &TokenConfig) -> Result<Self> {
        Self::new(&config.base_url, config.timeout())
    }

    /// Full URL of the token endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request_url(&self, user_name: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("userName", user_name);
        url
    }
}

fn token_endpoint(base_url: &str) -> Result<Url> {
    let base = format!("{}/", base_url.trim_end_matches('/'));
    let base =
        Url::parse(&base).map_err(|e| ChatError::Config(format!("invalid token URL: {e}")))?;
    base.join("getToken")
        .map_err(|e| ChatError::Config(format!("invalid token URL: {e}")))
}

fn parse_token(payload: &str) -> Option<String> {
    let token = match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Object(map)) => map.get("token")?.as_str()?.to_string(),
        _ => payload.trim().to_string(),
    };
    (!token.is_empty()).then_some(token)
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch_token(&self, user_name: &str) -> Result<String> {
        let url = self.request_url(user_name);
        debug!(user = user_name, url = %self.endpoint, "requesting access token");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ChatError::TokenFetch(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ChatError::TokenFetch(e.to_string()))?;

        if !status.is_success() {
            warn!(user = user_name, status = status.as_u16(), "token endpoint refused");
            return Err(ChatError::TokenFetch(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        parse_token(&body)
            .ok_or_else(|| ChatError::TokenFetch("token endpoint returned no token".into()))
    }
}
