//! Message window of the open conversation.

use crate::conversations::Message;

/// Loaded messages of exactly one conversation, ordered by index.
///
/// Indexes are strictly increasing: a fetched page only contributes messages
/// older than what is loaded, a live message is only appended when newer.
#[derive(Debug, Default)]
pub struct MessageWindow {
    conversation: Option<String>,
    messages: Vec<Message>,
    older_in_flight: bool,
}

impl MessageWindow {
    /// Empty the window and bind it to another conversation.
    pub fn reset(&mut self, conversation: Option<String>) {
        self.conversation = conversation;
        self.messages.clear();
        self.older_in_flight = false;
    }

    #[must_use]
    pub fn conversation(&self) -> Option<&str> {
        self.conversation.as_deref()
    }

    #[must_use]
    pub fn is_for(&self, sid: &str) -> bool {
        self.conversation.as_deref() == Some(sid)
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn oldest_index(&self) -> Option<u64> {
        self.messages.first().map(|m| m.index)
    }

    #[must_use]
    pub fn newest_index(&self) -> Option<u64> {
        self.messages.last().map(|m| m.index)
    }

    /// Put a fetched page in front of what is loaded. Returns how many
    /// messages were added.
    pub fn prepend_page(&mut self, mut page: Vec<Message>) -> usize {
        page.sort_by_key(|m| m.index);
        page.dedup_by_key(|m| m.index);
        if let Some(oldest) = self.oldest_index() {
            page.retain(|m| m.index < oldest);
        }
        let added = page.len();
        page.append(&mut self.messages);
        self.messages = page;
        added
    }

    /// Append a live message. Returns `false` if it is not newer than the
    /// newest loaded message.
    pub fn append_live(&mut self, message: Message) -> bool {
        if self.newest_index().is_some_and(|newest| message.index <= newest) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Anchor for the next older page, `None` when there is nothing older.
    #[must_use]
    pub fn older_anchor(&self) -> Option<u64> {
        match self.oldest_index() {
            Some(oldest) if oldest > 0 => Some(oldest - 1),
            _ => None,
        }
    }

    #[must_use]
    pub fn older_in_flight(&self) -> bool {
        self.older_in_flight
    }

    pub fn begin_older_fetch(&mut self) {
        self.older_in_flight = true;
    }

    pub fn finish_older_fetch(&mut self) {
        self.older_in_flight = false;
    }
}
