//! Chat list merge rules.

use std::sync::Arc;

use super::state::ConversationSummary;
use crate::conversations::{ConversationRef, Message};

/// Unread count and preview derived for one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationMeta {
    pub unread_count: u64,
    pub last_message_preview: String,
    /// Body of the newest message, if any.
    pub newest_body: Option<String>,
}

#[derive(Debug, Clone)]
struct ChatEntry {
    conversation: ConversationRef,
    summary: ConversationSummary,
}

/// Chat list with one entry per conversation sid.
///
/// Ordering: live additions are prepended, fetched conversations keep the
/// order the client returned them in. No operation here moves an entry.
#[derive(Debug, Default)]
pub struct ChatList {
    entries: Vec<ChatEntry>,
}

impl ChatList {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, sid: &str) -> bool {
        self.entries.iter().any(|e| e.summary.id == sid)
    }

    /// Conversation handle for a sid.
    #[must_use]
    pub fn conversation(&self, sid: &str) -> Option<ConversationRef> {
        self.entries
            .iter()
            .find(|e| e.summary.id == sid)
            .map(|e| Arc::clone(&e.conversation))
    }

    #[must_use]
    pub fn summary(&self, sid: &str) -> Option<&ConversationSummary> {
        self.entries
            .iter()
            .find(|e| e.summary.id == sid)
            .map(|e| &e.summary)
    }

    fn summary_mut(&mut self, sid: &str) -> Option<&mut ConversationSummary> {
        self.entries
            .iter_mut()
            .find(|e| e.summary.id == sid)
            .map(|e| &mut e.summary)
    }

    /// Prepend a freshly created conversation with zero unread and an empty
    /// preview. Returns `false` if it is already listed.
    pub fn prepend_new(&mut self, conversation: ConversationRef) -> bool {
        if self.contains(conversation.sid()) {
            return false;
        }
        let summary = ConversationSummary {
            id: conversation.sid().to_string(),
            friendly_name: conversation.friendly_name(),
            unread_count: 0,
            last_message_preview: String::new(),
        };
        self.entries.insert(
            0,
            ChatEntry {
                conversation,
                summary,
            },
        );
        true
    }

    /// Merge the result of a full list fetch.
    ///
    /// Unknown conversations are appended in the given order. Known ones keep
    /// their position and take the fresh handle. A known entry other than
    /// `current` whose fresh count is higher missed messages, so it takes
    /// that count and the newest body as preview. Returns how many entries
    /// were added.
    pub fn merge_loaded(
        &mut self,
        loaded: Vec<(ConversationRef, ConversationMeta)>,
        current: Option<&str>,
    ) -> usize {
        let mut added = 0;
        for (conversation, meta) in loaded {
            if let Some(entry) = self
                .entries
                .iter_mut()
                .find(|e| e.summary.id == conversation.sid())
            {
                let missed = current != Some(entry.summary.id.as_str())
                    && meta.unread_count > entry.summary.unread_count;
                if missed {
                    entry.summary.unread_count = meta.unread_count;
                    if let Some(body) = meta.newest_body {
                        entry.summary.last_message_preview = body;
                    }
                }
                entry.conversation = conversation;
                continue;
            }
            let summary = ConversationSummary {
                id: conversation.sid().to_string(),
                friendly_name: conversation.friendly_name(),
                unread_count: meta.unread_count,
                last_message_preview: meta.last_message_preview,
            };
            self.entries.push(ChatEntry {
                conversation,
                summary,
            });
            added += 1;
        }
        added
    }

    /// Fold a late-arriving derivation into an existing entry.
    ///
    /// Live updates that landed first win: the unread count never goes
    /// down, a preview is only filled in when still empty, and the open
    /// conversation keeps its zero count.
    pub fn backfill(&mut self, sid: &str, meta: ConversationMeta, is_current: bool) -> bool {
        let Some(summary) = self.summary_mut(sid) else {
            return false;
        };
        if !is_current {
            summary.unread_count = summary.unread_count.max(meta.unread_count);
        }
        if summary.last_message_preview.is_empty() {
            summary.last_message_preview = meta.last_message_preview;
        }
        true
    }

    /// A message arrived for a conversation that is not open.
    pub fn record_incoming(&mut self, message: &Message) -> bool {
        let Some(summary) = self.summary_mut(&message.conversation_sid) else {
            return false;
        };
        summary.last_message_preview.clone_from(&message.body);
        summary.unread_count += 1;
        true
    }

    /// Replace the preview without touching the unread count.
    pub fn set_preview(&mut self, sid: &str, body: &str) -> bool {
        let Some(summary) = self.summary_mut(sid) else {
            return false;
        };
        body.clone_into(&mut summary.last_message_preview);
        true
    }

    pub fn reset_unread(&mut self, sid: &str) -> bool {
        let Some(summary) = self.summary_mut(sid) else {
            return false;
        };
        summary.unread_count = 0;
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.entries.iter().map(|e| e.summary.clone()).collect()
    }
}
