//! The reconciliation actor.
//!
//! A single task owns all view state. Client events, user intents and the
//! results of spawned async operations all arrive as messages and are
//! applied one at a time, so no locking is needed. Every spawned operation
//! carries the connection epoch it was started under; results from an
//! abandoned connection are dropped on arrival, except send results from
//! the same session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::ReconcilerSettings;
use super::chat_list::{ChatList, ConversationMeta};
use super::state::{ConnectionPhase, ViewState};
use super::window::MessageWindow;
use crate::conversations::{
    ClientConnector, ClientEvent, ClientRef, ConnectionState, ConversationRef,
    CreateConversationOptions, EventStream, Message, Participant, SdkError,
};
use crate::error::{ChatError, Result};
use crate::session::Session;
use crate::token::TokenProvider;

/// User intents forwarded by the view layer.
#[derive(Debug)]
pub(crate) enum Intent {
    OpenChat(String),
    SendMessage(String),
    SetDraft(String),
    SetNewChatDraft(String),
    CreateChat(String),
    LoadOlder,
    Dispose(oneshot::Sender<()>),
}

#[derive(Debug)]
pub(crate) struct Completion {
    epoch: u64,
    update: Update,
}

#[derive(Debug)]
enum Update {
    Client(ClientEvent),
    EventsClosed,
    ClientReady(Result<ClientRef>),
    TokenRefreshed(Result<()>),
    ChatsLoaded(Result<Vec<(ConversationRef, ConversationMeta)>>),
    ConversationAccepted(ConversationRef),
    SummaryBackfilled {
        sid: String,
        meta: ConversationMeta,
    },
    PageFetched {
        sid: String,
        anchor: Option<u64>,
        result: Result<Vec<Message>>,
    },
    MessageSent {
        session: u64,
        sid: String,
        result: Result<u64>,
    },
    ChatCreated(Result<ConversationRef>),
    ErrorExpired {
        generation: u64,
    },
}

/// Sends results back to the actor, tagged with the epoch they started in.
#[derive(Debug, Clone)]
struct Reporter {
    tx: mpsc::UnboundedSender<Completion>,
    epoch: u64,
}

impl Reporter {
    fn send(&self, update: Update) {
        // The actor only goes away on dispose; late results are moot then.
        let _ = self.tx.send(Completion {
            epoch: self.epoch,
            update,
        });
    }
}

pub(crate) struct ChatCore {
    settings: ReconcilerSettings,
    tokens: Arc<dyn TokenProvider>,
    connector: Arc<dyn ClientConnector>,
    completions: mpsc::UnboundedSender<Completion>,
    view: watch::Sender<ViewState>,

    epoch: u64,
    /// Bumped whenever the session user is applied; reconnects keep it.
    session: u64,
    user_name: String,
    started_at: DateTime<Utc>,
    phase: ConnectionPhase,
    client: Option<ClientRef>,
    pump: Option<JoinHandle<()>>,
    vendor_state: Option<ConnectionState>,

    chats: ChatList,
    current: Option<ConversationRef>,
    window: MessageWindow,
    draft: String,
    new_chat_draft: String,
    error: Option<String>,
    error_generation: u64,
    pending_loads: usize,
    is_typing: bool,
}

impl ChatCore {
    pub(crate) fn new(
        settings: ReconcilerSettings,
        tokens: Arc<dyn TokenProvider>,
        connector: Arc<dyn ClientConnector>,
        completions: mpsc::UnboundedSender<Completion>,
        view: watch::Sender<ViewState>,
    ) -> Self {
        Self {
            settings,
            tokens,
            connector,
            completions,
            view,
            epoch: 0,
            session: 0,
            user_name: String::new(),
            started_at: Utc::now(),
            phase: ConnectionPhase::Disconnected,
            client: None,
            pump: None,
            vendor_state: None,
            chats: ChatList::default(),
            current: None,
            window: MessageWindow::default(),
            draft: String::new(),
            new_chat_draft: String::new(),
            error: None,
            error_generation: 0,
            pending_loads: 0,
            is_typing: false,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut intents: mpsc::UnboundedReceiver<Intent>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut session: watch::Receiver<Session>,
    ) {
        let initial = session.borrow_and_update().clone();
        self.apply_session(initial).await;
        self.publish();

        loop {
            tokio::select! {
                changed = session.changed() => {
                    if changed.is_err() {
                        debug!("session controller dropped, stopping");
                        self.teardown().await;
                        self.publish();
                        return;
                    }
                    let next = session.borrow_and_update().clone();
                    self.apply_session(next).await;
                }
                intent = intents.recv() => match intent {
                    Some(Intent::Dispose(done)) => {
                        self.teardown().await;
                        self.publish();
                        let _ = done.send(());
                        return;
                    }
                    Some(intent) => self.handle_intent(intent),
                    None => {
                        self.teardown().await;
                        return;
                    }
                },
                Some(completion) = completions.recv() => self.apply(completion),
            }
            self.publish();
        }
    }

    fn snapshot(&self) -> ViewState {
        ViewState {
            user_name: self.user_name.clone(),
            connection: self.phase.clone(),
            vendor_state: self.vendor_state,
            chats: self.chats.summaries(),
            current_conversation: self.current.as_ref().map(|c| c.sid().to_string()),
            messages: self.window.messages().to_vec(),
            draft: self.draft.clone(),
            new_chat_draft: self.new_chat_draft.clone(),
            error: self.error.clone(),
            is_loading: self.pending_loads > 0,
            is_typing: self.is_typing,
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn reporter(&self) -> Reporter {
        Reporter {
            tx: self.completions.clone(),
            epoch: self.epoch,
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = Update> + Send + 'static,
    {
        let reporter = self.reporter();
        tokio::spawn(async move {
            reporter.send(task.await);
        });
    }

    fn is_current(&self, sid: &str) -> bool {
        self.current.as_ref().is_some_and(|c| c.sid() == sid)
    }

    fn finish_load(&mut self) {
        self.pending_loads = self.pending_loads.saturating_sub(1);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session and connection lifecycle
    // ─────────────────────────────────────────────────────────────────────

    async fn apply_session(&mut self, session: Session) {
        let unchanged = session.user_name == self.user_name
            && !matches!(
                self.phase,
                ConnectionPhase::Disconnected | ConnectionPhase::Failed { .. }
            );
        if unchanged {
            return;
        }

        self.teardown().await;
        self.reset_view();
        self.session += 1;
        self.user_name = session.user_name;

        if self.user_name.is_empty() {
            info!("logged out");
            return;
        }

        self.started_at = Utc::now();
        info!(user = %self.user_name, "starting chat session");
        self.begin_connect();
    }

    fn reset_view(&mut self) {
        self.chats.clear();
        self.current = None;
        self.window.reset(None);
        self.draft.clear();
        self.new_chat_draft.clear();
        self.error = None;
        self.is_typing = false;
        self.vendor_state = None;
    }

    fn begin_connect(&mut self) {
        self.epoch += 1;
        self.phase = ConnectionPhase::Connecting;
        self.pending_loads += 1;

        let tokens = Arc::clone(&self.tokens);
        let connector = Arc::clone(&self.connector);
        let user = self.user_name.clone();
        debug!(user = %user, epoch = self.epoch, "connecting");

        self.spawn(async move {
            let result = async {
                let token = tokens.fetch_token(&user).await?;
                connector
                    .connect(&user, &token)
                    .await
                    .map_err(|e| ChatError::ClientInit(e.to_string()))
            }
            .await;
            Update::ClientReady(result)
        });
    }

    fn on_client_ready(&mut self, result: Result<ClientRef>) {
        self.finish_load();
        let client = match result {
            Ok(client) => client,
            Err(e) => {
                error!(user = %self.user_name, error = %e, "could not connect");
                self.phase = ConnectionPhase::Failed {
                    reason: e.to_string(),
                };
                return;
            }
        };

        let Some(events) = client.subscribe() else {
            let e = ChatError::ClientInit("client events already subscribed".into());
            error!(error = %e, "could not subscribe to client events");
            self.phase = ConnectionPhase::Failed {
                reason: e.to_string(),
            };
            tokio::spawn(async move { client.shutdown().await });
            return;
        };

        self.pump = Some(self.spawn_pump(events));
        self.client = Some(client);
        debug!(epoch = self.epoch, "client constructed, waiting for initialization");
    }

    /// Forward client events into the actor for the lifetime of one client.
    fn spawn_pump(&self, mut events: EventStream) -> JoinHandle<()> {
        let reporter = self.reporter();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                reporter.send(Update::Client(event));
            }
            reporter.send(Update::EventsClosed);
        })
    }

    /// Detach every event handler in one step.
    fn detach(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(client) = &self.client {
            client.remove_all_listeners();
        }
    }

    /// Drop the current client without waiting for it to shut down.
    fn abandon_client(&mut self, shutdown: bool) {
        self.detach();
        if let Some(client) = self.client.take() {
            if shutdown {
                tokio::spawn(async move { client.shutdown().await });
            }
        }
        self.epoch += 1;
        self.pending_loads = 0;
        self.window.finish_older_fetch();
    }

    /// Detach listeners, then release the client. Idempotent.
    async fn teardown(&mut self) {
        self.detach();
        if let Some(client) = self.client.take() {
            debug!(user = %self.user_name, "shutting down client");
            client.shutdown().await;
        }
        self.epoch += 1;
        self.pending_loads = 0;
        self.phase = ConnectionPhase::Disconnected;
    }

    fn fail_connection(&mut self, error: &ChatError) {
        error!(user = %self.user_name, error = %error, "connection failed");
        self.abandon_client(true);
        self.phase = ConnectionPhase::Failed {
            reason: error.to_string(),
        };
    }

    fn refresh_token(&mut self) {
        let Some(client) = self.client.clone() else {
            return;
        };
        if self.phase == ConnectionPhase::Connected {
            self.phase = ConnectionPhase::TokenRefreshing;
        }
        let tokens = Arc::clone(&self.tokens);
        let user = self.user_name.clone();
        self.spawn(async move {
            let result = async {
                let token = tokens.fetch_token(&user).await?;
                client
                    .update_token(&token)
                    .await
                    .map_err(|e| ChatError::TokenFetch(format!("token update rejected: {e}")))
            }
            .await;
            Update::TokenRefreshed(result)
        });
    }

    fn on_token_refreshed(&mut self, result: Result<()>) {
        if self.phase == ConnectionPhase::TokenRefreshing {
            self.phase = ConnectionPhase::Connected;
        }
        match result {
            Ok(()) => info!(user = %self.user_name, "access token refreshed"),
            // Not retried: the client keeps the old token until it expires.
            Err(e) => warn!(
                user = %self.user_name,
                error = %e,
                "token refresh failed, client token will go stale"
            ),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event and completion dispatch
    // ─────────────────────────────────────────────────────────────────────

    fn apply(&mut self, completion: Completion) {
        let Completion { epoch, update } = completion;
        // A send outlives a reconnect but not the session it was made in.
        let survives = match &update {
            Update::ErrorExpired { .. } => true,
            Update::MessageSent { session, .. } => *session == self.session,
            _ => false,
        };
        if epoch != self.epoch && !survives {
            trace!(epoch, current = self.epoch, "dropping stale result");
            if let Update::ClientReady(Ok(client)) = update {
                // Connected after the session moved on; nobody owns it.
                tokio::spawn(async move { client.shutdown().await });
            }
            return;
        }

        match update {
            Update::Client(event) => self.handle_client_event(event),
            Update::EventsClosed => debug!(epoch, "client event stream closed"),
            Update::ClientReady(result) => self.on_client_ready(result),
            Update::TokenRefreshed(result) => self.on_token_refreshed(result),
            Update::ChatsLoaded(result) => self.on_chats_loaded(result),
            Update::ConversationAccepted(conversation) => self.on_conversation_accepted(conversation),
            Update::SummaryBackfilled { sid, meta } => {
                let is_current = self.is_current(&sid);
                if !self.chats.backfill(&sid, meta, is_current) {
                    debug!(conversation = %sid, "backfill for unlisted conversation ignored");
                }
            }
            Update::PageFetched {
                sid,
                anchor,
                result,
            } => self.on_page_fetched(&sid, anchor, result),
            Update::MessageSent { sid, result, .. } => match result {
                Ok(index) => {
                    debug!(conversation = %sid, index, "message sent");
                    self.draft.clear();
                }
                Err(e) => error!(conversation = %sid, error = %e, "send failed, draft kept"),
            },
            Update::ChatCreated(result) => self.on_chat_created(result),
            Update::ErrorExpired { generation } => {
                if generation == self.error_generation {
                    self.error = None;
                }
            }
        }
    }

    fn handle_client_event(&mut self, event: ClientEvent) {
        trace!(event = event.name(), "client event");
        match event {
            ClientEvent::Initialized => {
                info!(user = %self.user_name, "client initialized");
                self.phase = ConnectionPhase::Connected;
                self.load_initial_chats();
            }
            ClientEvent::InitFailed { error } => {
                self.fail_connection(&ChatError::ClientInit(error));
            }
            ClientEvent::ConnectionStateChanged(state) => {
                debug!(state = ?state, "connection state changed");
                self.vendor_state = Some(state);
            }
            ClientEvent::ConnectionError { error } => {
                self.fail_connection(&ChatError::Connection(error));
            }
            ClientEvent::TokenAboutToExpire => {
                info!(user = %self.user_name, "token about to expire");
                self.refresh_token();
            }
            ClientEvent::TokenExpired => {
                warn!(user = %self.user_name, "token expired, reconnecting");
                self.abandon_client(false);
                self.begin_connect();
            }
            ClientEvent::ConversationAdded(conversation) => {
                self.consider_new_conversation(conversation);
            }
            ClientEvent::MessageAdded(message) => self.on_message_added(message),
            ClientEvent::TypingStarted(participant) => self.on_typing(&participant, true),
            ClientEvent::TypingEnded(participant) => self.on_typing(&participant, false),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Chat list
    // ─────────────────────────────────────────────────────────────────────

    fn load_initial_chats(&mut self) {
        let Some(client) = self.client.clone() else {
            return;
        };
        self.pending_loads += 1;
        self.spawn(async move {
            let result = async {
                let conversations = client
                    .subscribed_conversations()
                    .await
                    .map_err(ChatError::FetchFailure)?;
                let metas =
                    join_all(conversations.iter().map(|c| derive_meta(Arc::clone(c)))).await;
                Ok(conversations.into_iter().zip(metas).collect())
            }
            .await;
            Update::ChatsLoaded(result)
        });
    }

    fn on_chats_loaded(&mut self, result: Result<Vec<(ConversationRef, ConversationMeta)>>) {
        self.finish_load();
        let loaded = match result {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(user = %self.user_name, error = %e, "could not load chat list");
                return;
            }
        };
        let total = loaded.len();
        let current = self.current.as_ref().map(|c| c.sid());
        let added = self.chats.merge_loaded(loaded, current);
        info!(user = %self.user_name, total, added, "chat list loaded");

        // After a reconnect the open conversation needs its fresh handle and
        // a fresh first page.
        if let Some(sid) = self.current.as_ref().map(|c| c.sid().to_string()) {
            if let Some(fresh) = self.chats.conversation(&sid) {
                self.open(fresh);
            }
        }
    }

    fn consider_new_conversation(&mut self, conversation: ConversationRef) {
        if self.chats.contains(conversation.sid()) {
            trace!(conversation = %conversation.sid(), "conversation already listed");
            return;
        }
        let reporter = self.reporter();
        let settle = self.settings.backlog_settle;
        let started_at = self.started_at;
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            let is_new = conversation
                .date_created()
                .is_some_and(|created| created > started_at);
            if !is_new {
                trace!(conversation = %conversation.sid(), "backlog conversation skipped");
                return;
            }
            reporter.send(Update::ConversationAccepted(conversation));
        });
    }

    fn on_conversation_accepted(&mut self, conversation: ConversationRef) {
        let sid = conversation.sid().to_string();
        if !self.chats.prepend_new(Arc::clone(&conversation)) {
            debug!(conversation = %sid, "conversation already listed");
            return;
        }
        info!(conversation = %sid, "conversation added");
        // Only a conversation that made it into the list is marked unread.
        let mark_unread = !self.is_current(&sid);
        self.spawn(async move {
            if mark_unread {
                if let Err(e) = conversation.set_all_messages_unread().await {
                    warn!(conversation = %sid, error = %e, "could not mark messages unread");
                }
            }
            let meta = derive_meta(conversation).await;
            Update::SummaryBackfilled { sid, meta }
        });
    }

    fn on_message_added(&mut self, message: Message) {
        let sid = message.conversation_sid.clone();
        if let Some(current) = self.current.as_ref().filter(|c| c.sid() == sid) {
            let current = Arc::clone(current);
            let index = message.index;
            self.chats.set_preview(&sid, &message.body);
            if self.window.append_live(message) {
                mark_read(current, index);
            }
            return;
        }
        if !self.chats.record_incoming(&message) {
            debug!(conversation = %sid, "message for unlisted conversation ignored");
        }
    }

    fn on_typing(&mut self, participant: &Participant, typing: bool) {
        if self.is_current(&participant.conversation_sid) {
            self.is_typing = typing;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Message window
    // ─────────────────────────────────────────────────────────────────────

    fn open(&mut self, conversation: ConversationRef) {
        let sid = conversation.sid().to_string();
        debug!(conversation = %sid, "opening chat");
        self.window.reset(Some(sid));
        self.current = Some(conversation);
        self.is_typing = false;
        self.fetch_messages(None);
    }

    fn fetch_messages(&mut self, anchor: Option<u64>) {
        let Some(conversation) = self.current.clone() else {
            return;
        };
        if anchor.is_some() {
            self.window.begin_older_fetch();
        }
        self.pending_loads += 1;
        let page_size = self.settings.page_size;
        self.spawn(async move {
            let result = conversation
                .get_messages(page_size, anchor)
                .await
                .map_err(ChatError::FetchFailure);
            Update::PageFetched {
                sid: conversation.sid().to_string(),
                anchor,
                result,
            }
        });
    }

    fn on_page_fetched(&mut self, sid: &str, anchor: Option<u64>, result: Result<Vec<Message>>) {
        self.finish_load();
        if !self.window.is_for(sid) {
            debug!(conversation = %sid, "discarding page for a conversation no longer open");
            return;
        }
        if anchor.is_some() {
            self.window.finish_older_fetch();
        }

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                error!(conversation = %sid, error = %e, "could not fetch messages");
                return;
            }
        };
        let added = self.window.prepend_page(page);
        debug!(conversation = %sid, added, anchor = ?anchor, "messages loaded");

        if anchor.is_none() {
            if let (Some(newest), Some(current)) = (self.window.newest_index(), &self.current) {
                mark_read(Arc::clone(current), newest);
            }
            self.chats.reset_unread(sid);
        }
    }

    fn load_older(&mut self) {
        if self.window.older_in_flight() {
            trace!("older page already requested");
            return;
        }
        match self.window.older_anchor() {
            Some(anchor) => self.fetch_messages(Some(anchor)),
            None => trace!("no older messages to load"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Intents
    // ─────────────────────────────────────────────────────────────────────

    fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::OpenChat(sid) => match self.chats.conversation(&sid) {
                Some(conversation) => self.open(conversation),
                None => warn!(conversation = %sid, "cannot open unknown conversation"),
            },
            Intent::SendMessage(text) => self.send_message(text),
            Intent::SetDraft(text) => self.draft = text,
            Intent::SetNewChatDraft(text) => self.new_chat_draft = text,
            Intent::CreateChat(identity) => self.create_chat(identity),
            Intent::LoadOlder => self.load_older(),
            // Handled by the run loop.
            Intent::Dispose(_) => {}
        }
    }

    fn send_message(&mut self, text: String) {
        let Some(conversation) = self.current.clone() else {
            warn!("no open conversation to send to");
            return;
        };
        if text.trim().is_empty() {
            return;
        }
        let session = self.session;
        self.spawn(async move {
            let result = conversation
                .send_message(&text)
                .await
                .map_err(ChatError::SendFailure);
            Update::MessageSent {
                session,
                sid: conversation.sid().to_string(),
                result,
            }
        });
    }

    fn create_chat(&mut self, identity: String) {
        let Some(client) = self.client.clone() else {
            warn!("cannot create a chat while disconnected");
            return;
        };
        if identity.is_empty() {
            return;
        }
        self.pending_loads += 1;
        let me = self.user_name.clone();
        self.spawn(async move {
            Update::ChatCreated(create_conversation_with(client, identity, me).await)
        });
    }

    fn on_chat_created(&mut self, result: Result<ConversationRef>) {
        self.finish_load();
        match result {
            Ok(conversation) => {
                info!(conversation = %conversation.sid(), "chat created");
                self.open(conversation);
            }
            Err(e @ ChatError::UserNotFound { .. }) => {
                warn!(error = %e, "create chat target lookup failed");
                self.show_transient_error(e.user_message());
                self.new_chat_draft.clear();
            }
            Err(e) => error!(error = %e, "create chat failed"),
        }
    }

    fn show_transient_error(&mut self, message: String) {
        self.error_generation += 1;
        self.error = Some(message);
        let generation = self.error_generation;
        let delay = self.settings.error_clear_delay;
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            Update::ErrorExpired { generation }
        });
    }
}

/// Unread count and preview for one conversation.
///
/// The preview is the message at the read marker, or at index 0 when the
/// conversation was never read. The newest body is kept aside for
/// refreshing entries that are already listed. Failures fall back to zero
/// and empty.
async fn derive_meta(conversation: ConversationRef) -> ConversationMeta {
    let anchor = conversation.last_read_message_index().unwrap_or(0);
    let (unread, page, newest) = futures::join!(
        conversation.unread_messages_count(),
        conversation.get_messages(1, Some(anchor)),
        conversation.get_messages(1, None),
    );

    let unread_count = match unread {
        Ok(count) => count.unwrap_or(0),
        Err(e) => {
            warn!(conversation = %conversation.sid(), error = %e, "could not read unread count");
            0
        }
    };
    let last_message_preview = match page {
        Ok(mut page) => page.pop().map(|m| m.body).unwrap_or_default(),
        Err(e) => {
            warn!(conversation = %conversation.sid(), error = %e, "could not read preview");
            String::new()
        }
    };

    let newest_body = match newest {
        Ok(mut page) => page.pop().map(|m| m.body),
        Err(e) => {
            debug!(conversation = %conversation.sid(), error = %e, "could not read newest message");
            None
        }
    };

    ConversationMeta {
        unread_count,
        last_message_preview,
        newest_body,
    }
}

/// Advance the read marker in the background.
fn mark_read(conversation: ConversationRef, index: u64) {
    tokio::spawn(async move {
        if let Err(e) = conversation.update_last_read_message_index(index).await {
            warn!(conversation = %conversation.sid(), index, error = %e, "could not advance read marker");
        }
    });
}

/// Look up the other user, create the conversation, join it, mark it unread
/// and add the other user. Steps that succeeded are not undone when a later
/// one fails.
async fn create_conversation_with(
    client: ClientRef,
    other: String,
    me: String,
) -> Result<ConversationRef> {
    if let Err(e) = client.get_user(&other).await {
        debug!(identity = %other, error = %e, "user lookup failed");
        return Err(ChatError::UserNotFound { identity: other });
    }

    let step = |step: &'static str| move |source: SdkError| ChatError::CreateFailure { step, source };

    let conversation = client
        .create_conversation(CreateConversationOptions {
            friendly_name: Some(format!("{other}-{me}")),
        })
        .await
        .map_err(step("create"))?;
    conversation.join().await.map_err(step("join"))?;
    conversation
        .set_all_messages_unread()
        .await
        .map_err(step("mark unread"))?;
    conversation.add(&other).await.map_err(step("add participant"))?;
    Ok(conversation)
}
