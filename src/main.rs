//! Chat Sync demo
//!
//! Line-oriented client running the reconciliation core against the
//! in-memory conversations backend. Tokens come from the configured token
//! endpoint, or from `--static-token` when running offline.

#![allow(clippy::print_stdout)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use chat_sync::config::{AppConfig, Cli};
use chat_sync::conversations::memory::InMemoryBackend;
use chat_sync::reconcile::{ChatHandle, ReconcilerSettings, ViewState};
use chat_sync::session::SessionController;
use chat_sync::telemetry;
use chat_sync::token::{HttpTokenProvider, StaticTokenProvider, TokenProvider};

const HELP: &str = "\
commands:
  /login <user>             log in (restarts the session)
  /logout                   log out
  /list                     show the chat list
  /open <n|sid>             open a chat by list position or sid
  /older                    load older messages
  /new <user>               start a chat with <user>
  /seed <name> <user>...    create a conversation on the backend
  /as <user> <n|sid> <text> post a message as another user
  /typing <user> <n|sid>    show <user> typing for a moment
  /quit                     exit
anything else is sent to the open chat";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let cli = Cli::parse();
    let config = AppConfig::from_cli(&cli).context("loading configuration")?;
    telemetry::init(&config.logging);

    let tokens: Arc<dyn TokenProvider> = match &config.token.static_token {
        Some(token) => Arc::new(StaticTokenProvider::new(token.clone())),
        None => Arc::new(
            HttpTokenProvider::from_config(&config.token).context("building token client")?,
        ),
    };
    info!(
        name: "chat.config.loaded",
        page_size = config.chat.page_size,
        static_token = config.token.static_token.is_some(),
        "configuration loaded"
    );

    let backend = InMemoryBackend::new();
    let chat = ChatHandle::spawn(
        ReconcilerSettings::from(&config.chat),
        SessionController::new(),
        tokens,
        Arc::new(backend.clone()),
    );

    let renderer = tokio::spawn(render_changes(chat.view()));

    if let Some(user) = cli.user {
        chat.login(user);
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = run_command(&chat, &backend, line) {
            println!("! {e}");
        }
    }

    chat.shutdown().await;
    renderer.abort();
    Ok(())
}

fn run_command(chat: &ChatHandle, backend: &InMemoryBackend, line: &str) -> anyhow::Result<()> {
    if !line.starts_with('/') {
        chat.set_draft(line)?;
        chat.send_message(line)?;
        return Ok(());
    }
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(());
    };

    match command {
        "/login" => chat.login(words.next().context("usage: /login <user>")?),
        "/logout" => chat.logout(),
        "/list" => print_chats(&chat.snapshot()),
        "/open" => {
            let target = words.next().context("usage: /open <n|sid>")?;
            chat.open_chat(resolve_sid(&chat.snapshot(), target)?)?;
        }
        "/older" => chat.load_older()?,
        "/new" => {
            let user = words.next().context("usage: /new <user>")?;
            chat.set_new_chat_draft(user)?;
            chat.create_chat(user)?;
        }
        "/seed" => {
            let name = words.next().context("usage: /seed <name> <user>...")?;
            let participants: Vec<&str> = words.collect();
            let sid = backend.seed_conversation(name, &participants);
            println!("seeded {name} ({sid})");
        }
        "/as" => {
            let user = words.next().context("usage: /as <user> <n|sid> <text>")?;
            let target = words.next().context("usage: /as <user> <n|sid> <text>")?;
            let text = words.collect::<Vec<_>>().join(" ");
            let sid = resolve_sid(&chat.snapshot(), target)?;
            backend.post_message(&sid, user, &text)?;
        }
        "/typing" => {
            let user = words.next().context("usage: /typing <user> <n|sid>")?;
            let target = words.next().context("usage: /typing <user> <n|sid>")?;
            let sid = resolve_sid(&chat.snapshot(), target)?;
            backend.set_typing(&sid, user, true)?;
            let backend = backend.clone();
            let user = user.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs(3)).await;
                let _ = backend.set_typing(&sid, &user, false);
            });
        }
        "/help" => println!("{HELP}"),
        other => anyhow::bail!("unknown command {other}, try /help"),
    }
    Ok(())
}

/// Accept a 1-based chat list position or a sid.
fn resolve_sid(view: &ViewState, target: &str) -> anyhow::Result<String> {
    if let Ok(position) = target.parse::<usize>() {
        let chat = position
            .checked_sub(1)
            .and_then(|i| view.chats.get(i))
            .with_context(|| format!("no chat at position {position}"))?;
        return Ok(chat.id.clone());
    }
    Ok(target.to_string())
}

fn print_chats(view: &ViewState) {
    if view.chats.is_empty() {
        println!("(no chats)");
    }
    for (i, chat) in view.chats.iter().enumerate() {
        let marker = if view.current_conversation.as_deref() == Some(chat.id.as_str()) {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker}{:>2}. {} [{}] {}",
            i + 1,
            chat.friendly_name.as_deref().unwrap_or(&chat.id),
            chat.unread_count,
            chat.last_message_preview
        );
    }
}

async fn render_changes(mut view: tokio::sync::watch::Receiver<ViewState>) {
    let mut last = ViewState::default();
    while view.changed().await.is_ok() {
        let next = view.borrow_and_update().clone();

        if next.connection != last.connection {
            println!("~ connection: {:?}", next.connection);
        }
        if let Some(error) = next.error.as_ref().filter(|e| last.error.as_ref() != Some(*e)) {
            println!("! {error}");
        }
        if next.chats != last.chats {
            print_chats(&next);
        }
        if next.current_conversation != last.current_conversation {
            println!("~ open: {}", next.current_conversation.as_deref().unwrap_or("-"));
        }
        let reopened = next.current_conversation != last.current_conversation;
        for message in &next.messages {
            if !reopened && last.messages.iter().any(|m| m.index == message.index) {
                continue;
            }
            println!(
                "  #{} {}: {}",
                message.index,
                message.author.as_deref().unwrap_or("?"),
                message.body
            );
        }
        if next.is_typing && !last.is_typing {
            println!("~ typing...");
        }

        last = next;
    }
}
