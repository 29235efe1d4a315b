use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "chat-sync.yaml";

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Base URL of the token endpoint
    #[arg(long, env = "TOKEN_URL")]
    pub token_url: Option<String>,

    /// Use this token instead of calling the token endpoint
    #[arg(long, env = "STATIC_TOKEN")]
    pub static_token: Option<String>,

    /// Log in as this user on startup
    #[arg(short, long)]
    pub user: Option<String>,

    /// Emit JSON log lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub token: TokenConfig,
    pub chat: ChatConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    #[serde(default)]
    pub static_token: Option<String>,
}

impl TokenConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Messages per page fetch.
    pub page_size: usize,
    /// How long a transient error stays visible.
    pub error_clear_ms: u64,
    /// Settle window before a `conversationAdded` event is considered.
    pub backlog_settle_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;
        Self::from_cli(&cli)
    }

    /// Build the configuration. Priority: CLI flag > `CHAT_` env > file > defaults.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("token.base_url", "http://localhost:3000")?
            .set_default("token.timeout_ms", 5000)?
            .set_default("chat.page_size", 30)?
            .set_default("chat.error_clear_ms", 2000)?
            .set_default("chat.backlog_settle_ms", 500)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?;

        match &cli.config {
            Some(path) => builder = builder.add_source(File::with_name(path).required(true)),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));
            }
            None => {}
        }

        // E.g. CHAT_TOKEN__BASE_URL=http://tokens:3000
        builder = builder.add_source(
            Environment::with_prefix("CHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(url) = &cli.token_url {
            builder = builder.set_override("token.base_url", url.as_str())?;
        }
        if let Some(token) = &cli.static_token {
            builder = builder.set_override("token.static_token", token.as_str())?;
        }
        if let Some(json) = cli.log_json {
            builder = builder.set_override("logging.json", json)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chat.page_size == 0 {
            return Err(ConfigError::Message(
                "chat.page_size must be at least 1".into(),
            ));
        }
        if self.token.base_url.trim().is_empty() {
            return Err(ConfigError::Message("token.base_url cannot be empty".into()));
        }
        Ok(())
    }
}
