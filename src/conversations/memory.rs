//! In-process conversations service.
//!
//! [`InMemoryBackend`] plays the role of the hosted conversations service:
//! it stores users, conversations, messages and per-user read markers, and
//! fans events out to every connected client the way the vendor SDK does.
//! Tests drive it directly (post messages as other users, inject lifecycle
//! events, schedule failures); the demo binary uses it as its only backend.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{
    ClientConnector, ClientEvent, ClientRef, ConnectionState, Conversation, ConversationRef,
    ConversationsClient, CreateConversationOptions, EventStream, Message, Participant, SdkError,
    User,
};

/// Operations that can be told to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailurePoint {
    Connect,
    ListConversations,
    GetMessages,
    SendMessage,
    AddParticipant,
    UpdateToken,
}

/// Call counters, for asserting on side effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub connects: usize,
    pub list_calls: usize,
    pub message_fetches: usize,
    pub token_updates: usize,
    pub listener_detaches: usize,
    pub shutdowns: usize,
}

#[derive(Debug)]
struct ConversationRecord {
    sid: String,
    friendly_name: Option<String>,
    date_created: DateTime<Utc>,
    /// identity -> last read index
    participants: BTreeMap<String, Option<u64>>,
    messages: Vec<Message>,
}

impl ConversationRecord {
    fn unread_for(&self, identity: &str) -> Option<u64> {
        let read = self.participants.get(identity)?;
        let unread = match read {
            Some(last) => self.messages.iter().filter(|m| m.index > *last).count(),
            None => self.messages.len(),
        };
        Some(unread as u64)
    }
}

#[derive(Debug)]
struct ClientShared {
    id: u64,
    identity: String,
    events: Mutex<Option<mpsc::UnboundedSender<ClientEvent>>>,
    stream: Mutex<Option<EventStream>>,
    token: Mutex<String>,
}

impl ClientShared {
    fn emit(&self, event: ClientEvent) {
        let guard = lock(&self.events);
        if let Some(tx) = guard.as_ref() {
            // Receiver gone means nobody is listening any more.
            let _ = tx.send(event);
        }
    }
}

#[derive(Debug, Default)]
struct BackendState {
    users: BTreeSet<String>,
    conversations: Vec<ConversationRecord>,
    clients: Vec<Arc<ClientShared>>,
    next_client_id: u64,
    failures: BTreeSet<FailurePoint>,
    stats: BackendStats,
}

impl BackendState {
    fn conversation(&self, sid: &str) -> Result<&ConversationRecord, SdkError> {
        self.conversations
            .iter()
            .find(|c| c.sid == sid)
            .ok_or_else(|| SdkError::NotFound(format!("conversation {sid}")))
    }

    fn conversation_mut(&mut self, sid: &str) -> Result<&mut ConversationRecord, SdkError> {
        self.conversations
            .iter_mut()
            .find(|c| c.sid == sid)
            .ok_or_else(|| SdkError::NotFound(format!("conversation {sid}")))
    }

    fn take_failure(&mut self, point: FailurePoint) -> bool {
        self.failures.remove(&point)
    }

    fn clients_of(&self, identity: &str) -> Vec<Arc<ClientShared>> {
        self.clients
            .iter()
            .filter(|c| c.identity == identity)
            .cloned()
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process conversations service shared by every client it hands out.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<BackendState>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BackendState> {
        lock(&self.inner)
    }

    /// Register a user so it can be found by lookups.
    pub fn add_user(&self, identity: impl Into<String>) {
        self.state().users.insert(identity.into());
    }

    /// Create a conversation with the given participants, all with no read
    /// marker. Returns its sid.
    pub fn seed_conversation(&self, friendly_name: &str, participants: &[&str]) -> String {
        let sid = new_sid();
        let mut state = self.state();
        for p in participants {
            state.users.insert((*p).to_string());
        }
        state.conversations.push(ConversationRecord {
            sid: sid.clone(),
            friendly_name: Some(friendly_name.to_string()),
            date_created: Utc::now(),
            participants: participants
                .iter()
                .map(|p| ((*p).to_string(), None))
                .collect(),
            messages: Vec::new(),
        });
        sid
    }

    /// Post a message as `author` and notify every participant's clients.
    pub fn post_message(&self, sid: &str, author: &str, body: &str) -> Result<u64, SdkError> {
        let (message, targets) = {
            let mut state = self.state();
            let record = state.conversation_mut(sid)?;
            let index = record.messages.last().map_or(0, |m| m.index + 1);
            let message = Message {
                index,
                body: body.to_string(),
                author: Some(author.to_string()),
                conversation_sid: sid.to_string(),
                date_created: Some(Utc::now()),
            };
            record.messages.push(message.clone());
            let identities: Vec<String> = record.participants.keys().cloned().collect();
            let targets: Vec<_> = identities
                .iter()
                .flat_map(|identity| state.clients_of(identity))
                .collect();
            (message, targets)
        };
        let index = message.index;
        for client in targets {
            client.emit(ClientEvent::MessageAdded(message.clone()));
        }
        Ok(index)
    }

    /// Set a participant's read marker directly.
    pub fn set_last_read(
        &self,
        sid: &str,
        identity: &str,
        index: Option<u64>,
    ) -> Result<(), SdkError> {
        let mut state = self.state();
        let record = state.conversation_mut(sid)?;
        record.participants.insert(identity.to_string(), index);
        Ok(())
    }

    /// Read marker of a participant.
    #[must_use]
    pub fn last_read(&self, sid: &str, identity: &str) -> Option<u64> {
        let state = self.state();
        state
            .conversation(sid)
            .ok()
            .and_then(|c| c.participants.get(identity).copied().flatten())
    }

    /// All messages of a conversation.
    #[must_use]
    pub fn messages(&self, sid: &str) -> Vec<Message> {
        self.state()
            .conversation(sid)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    /// Sid of the first conversation with this friendly name.
    #[must_use]
    pub fn find_by_name(&self, friendly_name: &str) -> Option<String> {
        self.state()
            .conversations
            .iter()
            .find(|c| c.friendly_name.as_deref() == Some(friendly_name))
            .map(|c| c.sid.clone())
    }

    /// Participants of a conversation.
    #[must_use]
    pub fn participants(&self, sid: &str) -> Vec<String> {
        self.state()
            .conversation(sid)
            .map(|c| c.participants.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Deliver an event to every connected client of `identity`.
    pub fn emit_to(&self, identity: &str, event: ClientEvent) {
        let targets = self.state().clients_of(identity);
        for client in targets {
            client.emit(event.clone());
        }
    }

    /// Tell the other participants that `identity` started or stopped typing.
    pub fn set_typing(&self, sid: &str, identity: &str, typing: bool) -> Result<(), SdkError> {
        let targets = {
            let state = self.state();
            let record = state.conversation(sid)?;
            record
                .participants
                .keys()
                .filter(|p| p.as_str() != identity)
                .flat_map(|p| state.clients_of(p))
                .collect::<Vec<_>>()
        };
        let participant = Participant {
            identity: identity.to_string(),
            conversation_sid: sid.to_string(),
        };
        for client in targets {
            let event = if typing {
                ClientEvent::TypingStarted(participant.clone())
            } else {
                ClientEvent::TypingEnded(participant.clone())
            };
            client.emit(event);
        }
        Ok(())
    }

    /// Make the next call at `point` fail.
    pub fn fail_next(&self, point: FailurePoint) {
        self.state().failures.insert(point);
    }

    #[must_use]
    pub fn stats(&self) -> BackendStats {
        self.state().stats
    }

    /// Number of clients that are connected and not shut down.
    #[must_use]
    pub fn live_clients(&self) -> usize {
        self.state().clients.len()
    }

    /// Current token held by the newest client of `identity`.
    #[must_use]
    pub fn current_token(&self, identity: &str) -> Option<String> {
        self.state()
            .clients_of(identity)
            .last()
            .map(|c| lock(&c.token).clone())
    }

    fn handle(&self, sid: &str, identity: &str) -> ConversationRef {
        Arc::new(MemoryConversation {
            backend: self.clone(),
            sid: sid.to_string(),
            identity: identity.to_string(),
        })
    }

    fn add_participant(&self, sid: &str, identity: &str) -> Result<(), SdkError> {
        let newly_added = {
            let mut state = self.state();
            let record = state.conversation_mut(sid)?;
            if record.participants.contains_key(identity) {
                false
            } else {
                record.participants.insert(identity.to_string(), None);
                true
            }
        };
        if newly_added {
            self.emit_to(
                identity,
                ClientEvent::ConversationAdded(self.handle(sid, identity)),
            );
        }
        Ok(())
    }

    fn detach(&self, client_id: u64) {
        let mut state = self.state();
        state.stats.listener_detaches += 1;
        if let Some(client) = state.clients.iter().find(|c| c.id == client_id) {
            lock(&client.events).take();
        }
    }

    fn remove_client(&self, client_id: u64) {
        let mut state = self.state();
        let before = state.clients.len();
        state.clients.retain(|c| c.id != client_id);
        if state.clients.len() != before {
            state.stats.shutdowns += 1;
        }
    }
}

#[async_trait]
impl ClientConnector for InMemoryBackend {
    async fn connect(&self, identity: &str, token: &str) -> Result<ClientRef, SdkError> {
        if token.trim().is_empty() {
            return Err(SdkError::Rejected("access token is empty".into()));
        }

        let (client, backlog) = {
            let mut state = self.state();
            if state.take_failure(FailurePoint::Connect) {
                return Err(SdkError::Transport("connection refused".into()));
            }
            state.stats.connects += 1;
            // The service creates users on first connect.
            state.users.insert(identity.to_string());
            // A client whose listeners were detached is dead once its
            // identity connects again.
            state
                .clients
                .retain(|c| c.identity != identity || lock(&c.events).is_some());

            let (tx, rx) = mpsc::unbounded_channel();
            state.next_client_id += 1;
            let shared = Arc::new(ClientShared {
                id: state.next_client_id,
                identity: identity.to_string(),
                events: Mutex::new(Some(tx)),
                stream: Mutex::new(Some(rx)),
                token: Mutex::new(token.to_string()),
            });
            state.clients.push(Arc::clone(&shared));

            let backlog: Vec<String> = state
                .conversations
                .iter()
                .filter(|c| c.participants.contains_key(identity))
                .map(|c| c.sid.clone())
                .collect();
            (shared, backlog)
        };

        debug!(identity, client_id = client.id, "in-memory client connected");

        client.emit(ClientEvent::ConnectionStateChanged(ConnectionState::Connected));
        client.emit(ClientEvent::Initialized);
        for sid in backlog {
            client.emit(ClientEvent::ConversationAdded(self.handle(&sid, identity)));
        }

        Ok(Arc::new(MemoryClient {
            backend: self.clone(),
            shared: client,
        }))
    }
}

/// Client handed out by [`InMemoryBackend`].
#[derive(Debug)]
pub struct MemoryClient {
    backend: InMemoryBackend,
    shared: Arc<ClientShared>,
}

impl MemoryClient {
    fn ensure_live(&self) -> Result<(), SdkError> {
        let live = self
            .backend
            .state()
            .clients
            .iter()
            .any(|c| c.id == self.shared.id);
        if live { Ok(()) } else { Err(SdkError::Closed) }
    }
}

#[async_trait]
impl ConversationsClient for MemoryClient {
    fn subscribe(&self) -> Option<EventStream> {
        lock(&self.shared.stream).take()
    }

    async fn update_token(&self, token: &str) -> Result<(), SdkError> {
        self.ensure_live()?;
        {
            let mut state = self.backend.state();
            if state.take_failure(FailurePoint::UpdateToken) {
                return Err(SdkError::Rejected("token update refused".into()));
            }
            state.stats.token_updates += 1;
        }
        *lock(&self.shared.token) = token.to_string();
        Ok(())
    }

    async fn subscribed_conversations(&self) -> Result<Vec<ConversationRef>, SdkError> {
        self.ensure_live()?;
        let identity = &self.shared.identity;
        let sids: Vec<String> = {
            let mut state = self.backend.state();
            state.stats.list_calls += 1;
            if state.take_failure(FailurePoint::ListConversations) {
                return Err(SdkError::Transport("list conversations timed out".into()));
            }
            state
                .conversations
                .iter()
                .filter(|c| c.participants.contains_key(identity))
                .map(|c| c.sid.clone())
                .collect()
        };
        Ok(sids
            .iter()
            .map(|sid| self.backend.handle(sid, identity))
            .collect())
    }

    async fn get_user(&self, identity: &str) -> Result<User, SdkError> {
        self.ensure_live()?;
        let state = self.backend.state();
        if state.users.contains(identity) {
            Ok(User {
                identity: identity.to_string(),
                friendly_name: None,
            })
        } else {
            Err(SdkError::NotFound(format!("user {identity}")))
        }
    }

    async fn create_conversation(
        &self,
        options: CreateConversationOptions,
    ) -> Result<ConversationRef, SdkError> {
        self.ensure_live()?;
        let sid = new_sid();
        self.backend
            .state()
            .conversations
            .push(ConversationRecord {
                sid: sid.clone(),
                friendly_name: options.friendly_name,
                date_created: Utc::now(),
                participants: BTreeMap::new(),
                messages: Vec::new(),
            });
        Ok(self.backend.handle(&sid, &self.shared.identity))
    }

    fn remove_all_listeners(&self) {
        self.backend.detach(self.shared.id);
    }

    async fn shutdown(&self) {
        lock(&self.shared.events).take();
        self.backend.remove_client(self.shared.id);
    }
}

/// Conversation handle scoped to one user.
#[derive(Debug)]
struct MemoryConversation {
    backend: InMemoryBackend,
    sid: String,
    identity: String,
}

#[async_trait]
impl Conversation for MemoryConversation {
    fn sid(&self) -> &str {
        &self.sid
    }

    fn friendly_name(&self) -> Option<String> {
        self.backend
            .state()
            .conversation(&self.sid)
            .ok()
            .and_then(|c| c.friendly_name.clone())
    }

    fn date_created(&self) -> Option<DateTime<Utc>> {
        self.backend
            .state()
            .conversation(&self.sid)
            .ok()
            .map(|c| c.date_created)
    }

    fn last_read_message_index(&self) -> Option<u64> {
        self.backend.last_read(&self.sid, &self.identity)
    }

    async fn join(&self) -> Result<(), SdkError> {
        self.backend.add_participant(&self.sid, &self.identity)
    }

    async fn add(&self, identity: &str) -> Result<(), SdkError> {
        {
            let mut state = self.backend.state();
            if state.take_failure(FailurePoint::AddParticipant) {
                return Err(SdkError::Rejected(format!("cannot add {identity}")));
            }
            if !state.users.contains(identity) {
                return Err(SdkError::NotFound(format!("user {identity}")));
            }
        }
        self.backend.add_participant(&self.sid, identity)
    }

    async fn set_all_messages_unread(&self) -> Result<(), SdkError> {
        self.backend.set_last_read(&self.sid, &self.identity, None)
    }

    async fn unread_messages_count(&self) -> Result<Option<u64>, SdkError> {
        let state = self.backend.state();
        Ok(state.conversation(&self.sid)?.unread_for(&self.identity))
    }

    async fn get_messages(
        &self,
        page_size: usize,
        anchor: Option<u64>,
    ) -> Result<Vec<Message>, SdkError> {
        let mut state = self.backend.state();
        state.stats.message_fetches += 1;
        if state.take_failure(FailurePoint::GetMessages) {
            return Err(SdkError::Transport("message page timed out".into()));
        }
        let record = state.conversation(&self.sid)?;
        let eligible: Vec<&Message> = record
            .messages
            .iter()
            .filter(|m| anchor.is_none_or(|a| m.index <= a))
            .collect();
        let skip = eligible.len().saturating_sub(page_size);
        Ok(eligible.into_iter().skip(skip).cloned().collect())
    }

    async fn send_message(&self, body: &str) -> Result<u64, SdkError> {
        {
            let mut state = self.backend.state();
            if state.take_failure(FailurePoint::SendMessage) {
                return Err(SdkError::Rejected("message rejected".into()));
            }
            let record = state.conversation(&self.sid)?;
            if !record.participants.contains_key(&self.identity) {
                return Err(SdkError::Rejected(format!(
                    "{} is not a participant",
                    self.identity
                )));
            }
        }
        self.backend.post_message(&self.sid, &self.identity, body)
    }

    async fn update_last_read_message_index(&self, index: u64) -> Result<(), SdkError> {
        self.backend
            .set_last_read(&self.sid, &self.identity, Some(index))
    }
}

fn new_sid() -> String {
    format!("CH{}", Uuid::new_v4().simple())
}
