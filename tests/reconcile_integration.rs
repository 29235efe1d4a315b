use std::sync::Arc;
use std::time::Duration;

use chat_sync::conversations::memory::{FailurePoint, InMemoryBackend};
use chat_sync::conversations::{ClientConnector, ClientEvent, ConnectionState};
use chat_sync::reconcile::{ChatHandle, ConnectionPhase, ReconcilerSettings, ViewState};
use chat_sync::session::SessionController;
use chat_sync::token::StaticTokenProvider;

fn start(backend: &InMemoryBackend) -> ChatHandle {
    ChatHandle::spawn(
        ReconcilerSettings::default(),
        SessionController::new(),
        Arc::new(StaticTokenProvider::new("test-token")),
        Arc::new(backend.clone()),
    )
}

/// Conversation between alice and bob with `count` messages from bob,
/// `m0`..`m{count-1}`.
fn seed_chat(backend: &InMemoryBackend, name: &str, count: u64) -> String {
    let sid = backend.seed_conversation(name, &["alice", "bob"]);
    for i in 0..count {
        backend.post_message(&sid, "bob", &format!("m{i}")).unwrap();
    }
    sid
}

async fn until<F>(chat: &ChatHandle, predicate: F) -> ViewState
where
    F: FnMut(&ViewState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(30), chat.wait_until(predicate))
        .await
        .expect("view condition not reached")
        .expect("chat core stopped")
}

async fn eventually<F: FnMut() -> bool>(mut condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached");
}

/// Let spawned tasks and the backlog settle window run out.
async fn settle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}

async fn login_loaded(chat: &ChatHandle, user: &str, chats: usize) -> ViewState {
    chat.login(user);
    until(chat, |v| {
        v.connection == ConnectionPhase::Connected && v.chats.len() == chats && !v.is_loading
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn initial_list_shows_unread_and_preview_then_open_marks_read() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 10);
    backend.set_last_read(&c1, "alice", Some(4)).unwrap();
    let chat = start(&backend);

    let view = login_loaded(&chat, "alice", 1).await;
    let summary = view.chat(&c1).unwrap();
    assert_eq!(summary.unread_count, 5);
    assert_eq!(summary.last_message_preview, "m4");
    assert_eq!(summary.friendly_name.as_deref(), Some("c1"));
    assert_eq!(view.user_name, "alice");
    assert_eq!(view.vendor_state, Some(ConnectionState::Connected));

    chat.open_chat(&c1).unwrap();
    let view = until(&chat, |v| v.messages.len() == 10).await;
    assert_eq!(view.message_indexes(), (0..10).collect::<Vec<_>>());
    assert_eq!(view.chat(&c1).unwrap().unread_count, 0);
    assert_eq!(view.current_conversation.as_deref(), Some(c1.as_str()));

    settle().await;
    assert_eq!(backend.last_read(&c1, "alice"), Some(9));

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn background_message_bumps_unread_and_preview() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 8);
    backend.set_last_read(&c1, "alice", Some(5)).unwrap();
    let chat = start(&backend);

    let view = login_loaded(&chat, "alice", 1).await;
    assert_eq!(view.chat(&c1).unwrap().unread_count, 2);

    backend.post_message(&c1, "bob", "hi").unwrap();
    let view = until(&chat, |v| v.chat(&c1).is_some_and(|c| c.unread_count == 3)).await;
    assert_eq!(view.chat(&c1).unwrap().last_message_preview, "hi");
    assert!(view.messages.is_empty());

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reopened_chat_includes_messages_received_while_away() {
    let backend = InMemoryBackend::new();
    let a = seed_chat(&backend, "a", 2);
    let b = seed_chat(&backend, "b", 1);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 2).await;

    chat.open_chat(&a).unwrap();
    until(&chat, |v| v.messages.len() == 2).await;
    chat.open_chat(&b).unwrap();
    until(&chat, |v| v.current_conversation.as_deref() == Some(b.as_str()) && v.messages.len() == 1)
        .await;

    backend.post_message(&a, "bob", "while away").unwrap();
    let view = until(&chat, |v| v.chat(&a).is_some_and(|c| c.unread_count == 1)).await;
    assert_eq!(view.messages.len(), 1);

    chat.open_chat(&a).unwrap();
    let view = until(&chat, |v| {
        v.current_conversation.as_deref() == Some(a.as_str()) && v.messages.len() == 3
    })
    .await;
    assert_eq!(view.messages[2].body, "while away");
    assert_eq!(view.chat(&a).unwrap().unread_count, 0);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn never_read_conversation_counts_everything_unread() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 3);
    let chat = start(&backend);

    let view = login_loaded(&chat, "alice", 1).await;
    let summary = view.chat(&c1).unwrap();
    assert_eq!(summary.unread_count, 3);
    assert_eq!(summary.last_message_preview, "m0");

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn list_fetch_failure_leaves_list_empty() {
    let backend = InMemoryBackend::new();
    seed_chat(&backend, "c1", 3);
    backend.fail_next(FailurePoint::ListConversations);
    let chat = start(&backend);

    let view = login_loaded(&chat, "alice", 0).await;
    assert!(view.chats.is_empty());
    assert!(view.error.is_none());

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn live_messages_update_open_and_background_chats() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 2);
    let c2 = seed_chat(&backend, "c2", 2);
    backend.set_last_read(&c1, "alice", Some(1)).unwrap();
    backend.set_last_read(&c2, "alice", Some(1)).unwrap();
    let chat = start(&backend);
    login_loaded(&chat, "alice", 2).await;

    chat.open_chat(&c1).unwrap();
    until(&chat, |v| v.messages.len() == 2).await;

    backend.post_message(&c1, "bob", "to open chat").unwrap();
    backend.post_message(&c2, "bob", "to other chat").unwrap();

    let view = until(&chat, |v| {
        v.messages.len() == 3 && v.chat(&c2).is_some_and(|c| c.unread_count == 1)
    })
    .await;
    assert_eq!(view.messages[2].body, "to open chat");
    let open = view.chat(&c1).unwrap();
    assert_eq!(open.unread_count, 0);
    assert_eq!(open.last_message_preview, "to open chat");
    assert_eq!(view.chat(&c2).unwrap().last_message_preview, "to other chat");

    settle().await;
    assert_eq!(backend.last_read(&c1, "alice"), Some(2));
    assert_eq!(backend.last_read(&c2, "alice"), Some(1));

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn message_for_unknown_conversation_is_ignored() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 1);
    let chat = start(&backend);
    let before = login_loaded(&chat, "alice", 1).await;

    backend.emit_to(
        "alice",
        ClientEvent::MessageAdded(chat_sync::conversations::Message {
            index: 0,
            body: "stray".into(),
            author: Some("mallory".into()),
            conversation_sid: "CHunknown".into(),
            date_created: None,
        }),
    );
    settle().await;

    let after = chat.snapshot();
    assert_eq!(after.chats, before.chats);
    assert_eq!(after.chat(&c1).unwrap().unread_count, 1);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn backlog_conversations_are_not_re_added_or_marked_unread() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 10);
    backend.set_last_read(&c1, "alice", Some(9)).unwrap();
    let chat = start(&backend);

    login_loaded(&chat, "alice", 1).await;
    settle().await;

    let view = chat.snapshot();
    assert_eq!(view.chats.len(), 1);
    assert_eq!(view.chat(&c1).unwrap().unread_count, 0);
    assert_eq!(backend.last_read(&c1, "alice"), Some(9));

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn conversation_created_during_session_is_prepended() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 1);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 1).await;

    let bob = backend.connect("bob", "bob-token").await.unwrap();
    let fresh = bob
        .create_conversation(chat_sync::conversations::CreateConversationOptions {
            friendly_name: Some("alice-bob".into()),
        })
        .await
        .unwrap();
    fresh.join().await.unwrap();
    fresh.send_message("hello").await.unwrap();
    fresh.add("alice").await.unwrap();

    let view = until(&chat, |v| {
        v.chats.len() == 2 && v.chats[0].last_message_preview == "hello"
    })
    .await;
    assert_eq!(view.chats[0].id, fresh.sid());
    assert_eq!(view.chats[0].friendly_name.as_deref(), Some("alice-bob"));
    assert_eq!(view.chats[0].unread_count, 1);
    assert_eq!(view.chats[1].id, c1);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pagination_walks_back_to_the_first_message() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 70);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 1).await;

    chat.open_chat(&c1).unwrap();
    let view = until(&chat, |v| !v.messages.is_empty() && !v.is_loading).await;
    assert_eq!(view.message_indexes(), (40..70).collect::<Vec<_>>());

    chat.load_older().unwrap();
    let view = until(&chat, |v| v.messages.len() == 60).await;
    assert_eq!(view.message_indexes(), (10..70).collect::<Vec<_>>());

    chat.load_older().unwrap();
    let view = until(&chat, |v| v.messages.len() == 70).await;
    assert_eq!(view.message_indexes(), (0..70).collect::<Vec<_>>());

    let fetches = backend.stats().message_fetches;
    chat.load_older().unwrap();
    settle().await;
    assert_eq!(backend.stats().message_fetches, fetches);
    assert_eq!(chat.snapshot().messages.len(), 70);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn load_older_is_a_noop_at_index_zero() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 5);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 1).await;

    chat.open_chat(&c1).unwrap();
    until(&chat, |v| v.messages.len() == 5 && !v.is_loading).await;

    let fetches = backend.stats().message_fetches;
    chat.load_older().unwrap();
    settle().await;
    assert_eq!(backend.stats().message_fetches, fetches);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn repeated_load_older_fetches_once() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 70);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 1).await;

    chat.open_chat(&c1).unwrap();
    until(&chat, |v| v.messages.len() == 30 && !v.is_loading).await;

    let fetches = backend.stats().message_fetches;
    chat.load_older().unwrap();
    chat.load_older().unwrap();
    chat.load_older().unwrap();
    settle().await;

    assert_eq!(backend.stats().message_fetches, fetches + 1);
    assert_eq!(
        chat.snapshot().message_indexes(),
        (10..70).collect::<Vec<_>>()
    );

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn switching_chats_keeps_window_on_latest_selection() {
    let backend = InMemoryBackend::new();
    let a = seed_chat(&backend, "a", 3);
    let b = seed_chat(&backend, "b", 2);
    let chat = start(&backend);
    let view = login_loaded(&chat, "alice", 2).await;
    assert_eq!(view.chat(&a).unwrap().unread_count, 3);

    // A's page is still in flight when B is selected.
    chat.open_chat(&a).unwrap();
    chat.open_chat(&b).unwrap();
    settle().await;

    let view = chat.snapshot();
    assert_eq!(view.current_conversation.as_deref(), Some(b.as_str()));
    assert!(view.messages.iter().all(|m| m.conversation_sid == b));
    assert_eq!(view.messages.len(), 2);
    // The discarded page did not mark A read.
    assert_eq!(view.chat(&a).unwrap().unread_count, 3);
    assert_eq!(backend.last_read(&a, "alice"), None);

    chat.open_chat(&a).unwrap();
    let view = until(&chat, |v| {
        v.current_conversation.as_deref() == Some(a.as_str()) && v.messages.len() == 3
    })
    .await;
    assert!(view.messages.iter().all(|m| m.conversation_sid == a));
    assert_eq!(view.chat(&a).unwrap().unread_count, 0);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn opening_unknown_chat_is_ignored() {
    let backend = InMemoryBackend::new();
    seed_chat(&backend, "c1", 1);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 1).await;

    chat.open_chat("CHmissing").unwrap();
    settle().await;
    assert_eq!(chat.snapshot().current_conversation, None);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn typing_is_shown_only_for_open_chat() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 1);
    let c2 = seed_chat(&backend, "c2", 1);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 2).await;

    // Nothing open yet.
    backend.set_typing(&c1, "bob", true).unwrap();
    settle().await;
    assert!(!chat.snapshot().is_typing);

    chat.open_chat(&c1).unwrap();
    until(&chat, |v| v.messages.len() == 1).await;
    assert!(!chat.snapshot().is_typing);

    backend.set_typing(&c2, "bob", true).unwrap();
    settle().await;
    assert!(!chat.snapshot().is_typing);

    backend.set_typing(&c1, "bob", true).unwrap();
    until(&chat, |v| v.is_typing).await;

    backend.set_typing(&c2, "bob", false).unwrap();
    settle().await;
    assert!(chat.snapshot().is_typing);

    backend.set_typing(&c1, "bob", false).unwrap();
    until(&chat, |v| !v.is_typing).await;

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn send_failure_keeps_draft_and_success_clears_it() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 1);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 1).await;
    chat.open_chat(&c1).unwrap();
    until(&chat, |v| v.messages.len() == 1).await;

    chat.set_draft("hi bob").unwrap();
    backend.fail_next(FailurePoint::SendMessage);
    chat.send_message("hi bob").unwrap();
    settle().await;

    let view = chat.snapshot();
    assert_eq!(view.draft, "hi bob");
    assert_eq!(view.messages.len(), 1);
    assert!(view.error.is_none());

    chat.send_message("hi bob").unwrap();
    let view = until(&chat, |v| v.draft.is_empty() && v.messages.len() == 2).await;
    assert_eq!(view.messages[1].body, "hi bob");
    assert_eq!(view.messages[1].author.as_deref(), Some("alice"));
    assert_eq!(backend.messages(&c1).len(), 2);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn send_without_open_chat_is_ignored() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 1);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 1).await;

    chat.set_draft("lost").unwrap();
    chat.send_message("lost").unwrap();
    settle().await;

    assert_eq!(chat.snapshot().draft, "lost");
    assert_eq!(backend.messages(&c1).len(), 1);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn create_chat_with_unknown_user_shows_transient_error() {
    let backend = InMemoryBackend::new();
    let chat = start(&backend);
    login_loaded(&chat, "alice", 0).await;

    chat.set_new_chat_draft("bob").unwrap();
    let started = tokio::time::Instant::now();
    chat.create_chat("bob").unwrap();

    let view = until(&chat, |v| v.error.is_some()).await;
    assert_eq!(view.error.as_deref(), Some("User not found in Twilio"));
    assert_eq!(view.new_chat_draft, "");
    assert!(view.chats.is_empty());

    until(&chat, |v| v.error.is_none()).await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2), "cleared after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "cleared after {elapsed:?}");

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn newer_error_is_not_cleared_by_older_timer() {
    let backend = InMemoryBackend::new();
    let chat = start(&backend);
    login_loaded(&chat, "alice", 0).await;

    chat.create_chat("bob").unwrap();
    until(&chat, |v| v.error.is_some()).await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    chat.create_chat("zed").unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    // The first timer has fired; the second error is still fresh.
    assert!(chat.snapshot().error.is_some());

    until(&chat, |v| v.error.is_none()).await;

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn create_chat_opens_named_conversation() {
    let backend = InMemoryBackend::new();
    backend.add_user("carol");
    let chat = start(&backend);
    login_loaded(&chat, "alice", 0).await;

    chat.create_chat("carol").unwrap();
    let view = until(&chat, |v| v.current_conversation.is_some() && v.chats.len() == 1).await;

    let sid = view.current_conversation.clone().unwrap();
    assert_eq!(backend.find_by_name("carol-alice").as_deref(), Some(sid.as_str()));
    assert_eq!(view.chats[0].id, sid);
    assert_eq!(view.chats[0].unread_count, 0);
    assert_eq!(backend.participants(&sid), vec!["alice", "carol"]);
    assert!(view.error.is_none());

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn create_chat_step_failure_keeps_partial_conversation() {
    let backend = InMemoryBackend::new();
    backend.add_user("carol");
    let chat = start(&backend);
    login_loaded(&chat, "alice", 0).await;

    backend.fail_next(FailurePoint::AddParticipant);
    chat.create_chat("carol").unwrap();
    settle().await;

    let sid = backend.find_by_name("carol-alice").expect("conversation was created");
    assert_eq!(backend.participants(&sid), vec!["alice"]);
    let view = chat.snapshot();
    assert_eq!(view.current_conversation, None);
    assert!(view.error.is_none());

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn token_expiry_reconnects_without_duplicating_chats() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 3);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 1).await;
    chat.open_chat(&c1).unwrap();
    until(&chat, |v| v.messages.len() == 3).await;
    assert_eq!(backend.stats().list_calls, 1);

    backend.emit_to("alice", ClientEvent::TokenExpired);

    eventually(|| backend.stats().list_calls == 2).await;
    let view = until(&chat, |v| {
        v.connection == ConnectionPhase::Connected && !v.is_loading && v.messages.len() == 3
    })
    .await;
    let stats = backend.stats();
    assert_eq!(stats.connects, 2);
    assert_eq!(stats.listener_detaches, 1);
    assert_eq!(backend.live_clients(), 1);
    assert_eq!(view.chats.len(), 1);
    assert_eq!(view.current_conversation.as_deref(), Some(c1.as_str()));
    settle().await;
    assert_eq!(backend.stats().list_calls, 2);

    // Events from the new client still flow.
    backend.post_message(&c1, "bob", "after reconnect").unwrap();
    let view = until(&chat, |v| v.messages.len() == 4).await;
    assert_eq!(view.messages[3].body, "after reconnect");

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn token_expiry_keeps_read_marker_of_chat_added_this_session() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 1);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 1).await;

    let bob = backend.connect("bob", "bob-token").await.unwrap();
    let fresh = bob
        .create_conversation(chat_sync::conversations::CreateConversationOptions {
            friendly_name: Some("alice-bob".into()),
        })
        .await
        .unwrap();
    fresh.join().await.unwrap();
    fresh.add("alice").await.unwrap();
    fresh.send_message("hello").await.unwrap();
    until(&chat, |v| v.chats.len() == 2 && !v.is_loading).await;

    chat.open_chat(fresh.sid()).unwrap();
    until(&chat, |v| v.messages.len() == 1).await;
    settle().await;
    assert_eq!(backend.last_read(fresh.sid(), "alice"), Some(0));

    chat.open_chat(&c1).unwrap();
    until(&chat, |v| v.current_conversation.as_deref() == Some(c1.as_str()) && !v.is_loading)
        .await;

    backend.emit_to("alice", ClientEvent::TokenExpired);
    eventually(|| backend.stats().list_calls == 2).await;
    // Past the backlog window for the replayed conversationAdded events.
    settle().await;
    settle().await;

    assert_eq!(backend.last_read(fresh.sid(), "alice"), Some(0));
    let view = chat.snapshot();
    assert_eq!(view.chats.len(), 2);
    assert_eq!(view.chat(fresh.sid()).unwrap().unread_count, 0);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn message_posted_during_reconnect_counts_as_unread() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 1);
    let chat = start(&backend);
    let view = login_loaded(&chat, "alice", 1).await;
    assert_eq!(view.chat(&c1).unwrap().unread_count, 1);

    // Lands on the expiring client, whose events are dropped.
    backend.emit_to("alice", ClientEvent::TokenExpired);
    backend.post_message(&c1, "bob", "during reconnect").unwrap();

    eventually(|| backend.stats().list_calls == 2).await;
    let view = until(&chat, |v| v.chat(&c1).is_some_and(|c| c.unread_count == 2)).await;
    assert_eq!(view.chat(&c1).unwrap().last_message_preview, "during reconnect");
    assert_eq!(view.chats.len(), 1);

    settle().await;
    assert_eq!(chat.snapshot().chat(&c1).unwrap().unread_count, 2);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn send_completing_after_token_expiry_clears_draft() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 1);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 1).await;
    chat.open_chat(&c1).unwrap();
    until(&chat, |v| v.messages.len() == 1).await;

    chat.set_draft("hi bob").unwrap();
    chat.send_message("hi bob").unwrap();
    backend.emit_to("alice", ClientEvent::TokenExpired);

    let view = until(&chat, |v| {
        v.draft.is_empty() && v.connection == ConnectionPhase::Connected && v.messages.len() == 2
    })
    .await;
    assert_eq!(view.messages[1].body, "hi bob");
    assert_eq!(backend.messages(&c1).len(), 2);
    assert_eq!(backend.stats().connects, 2);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn token_about_to_expire_refreshes_in_place() {
    let backend = InMemoryBackend::new();
    let chat = start(&backend);
    login_loaded(&chat, "alice", 0).await;

    backend.emit_to("alice", ClientEvent::TokenAboutToExpire);
    eventually(|| backend.stats().token_updates == 1).await;
    until(&chat, |v| v.connection == ConnectionPhase::Connected).await;
    assert_eq!(backend.stats().connects, 1);

    backend.fail_next(FailurePoint::UpdateToken);
    backend.emit_to("alice", ClientEvent::TokenAboutToExpire);
    settle().await;
    assert_eq!(chat.snapshot().connection, ConnectionPhase::Connected);
    assert_eq!(backend.stats().token_updates, 1);
    assert_eq!(backend.stats().connects, 1);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connect_failure_is_terminal_until_next_login() {
    let backend = InMemoryBackend::new();
    seed_chat(&backend, "c1", 1);
    backend.fail_next(FailurePoint::Connect);
    let chat = start(&backend);

    chat.login("alice");
    let view = until(&chat, |v| matches!(v.connection, ConnectionPhase::Failed { .. })).await;
    assert!(!view.is_loading);
    settle().await;
    assert_eq!(backend.stats().connects, 0);

    login_loaded(&chat, "alice", 1).await;
    assert_eq!(backend.stats().connects, 1);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connection_error_releases_client() {
    let backend = InMemoryBackend::new();
    let chat = start(&backend);
    login_loaded(&chat, "alice", 0).await;

    backend.emit_to(
        "alice",
        ClientEvent::ConnectionError {
            error: "socket closed".into(),
        },
    );
    let view = until(&chat, |v| matches!(v.connection, ConnectionPhase::Failed { .. })).await;
    assert!(matches!(&view.connection, ConnectionPhase::Failed { reason } if reason.contains("socket closed")));
    eventually(|| backend.live_clients() == 0).await;

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn same_user_again_does_not_reconnect() {
    let backend = InMemoryBackend::new();
    let chat = start(&backend);
    login_loaded(&chat, "alice", 0).await;

    chat.login("alice");
    settle().await;
    assert_eq!(backend.stats().connects, 1);
    assert_eq!(backend.live_clients(), 1);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn logout_resets_view_and_releases_client() {
    let backend = InMemoryBackend::new();
    let c1 = seed_chat(&backend, "c1", 2);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 1).await;
    chat.open_chat(&c1).unwrap();
    chat.set_draft("unsent").unwrap();
    until(&chat, |v| v.messages.len() == 2).await;

    chat.logout();
    let view = until(&chat, |v| v.user_name.is_empty()).await;
    assert_eq!(view, ViewState::default());

    let stats = backend.stats();
    assert_eq!(backend.live_clients(), 0);
    assert_eq!(stats.listener_detaches, 1);
    assert_eq!(stats.shutdowns, 1);

    // Events for the old session no longer reach the view.
    backend.post_message(&c1, "bob", "too late").unwrap();
    settle().await;
    assert_eq!(chat.snapshot(), ViewState::default());

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn switching_user_rebuilds_state() {
    let backend = InMemoryBackend::new();
    seed_chat(&backend, "c1", 1);
    let other = backend.seed_conversation("bob-only", &["bob", "carol"]);
    let chat = start(&backend);
    login_loaded(&chat, "alice", 1).await;

    let view = login_loaded(&chat, "bob", 2).await;
    assert_eq!(view.user_name, "bob");
    assert!(view.chat(&other).is_some());
    eventually(|| backend.live_clients() == 1).await;
    assert_eq!(backend.stats().shutdowns, 1);

    chat.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_client_and_stops_core() {
    let backend = InMemoryBackend::new();
    let chat = start(&backend);
    login_loaded(&chat, "alice", 0).await;
    let view = chat.view();

    chat.shutdown().await;
    assert_eq!(backend.live_clients(), 0);
    assert!(view.has_changed().is_err());
}
