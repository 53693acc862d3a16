//! Conversation message state.
//!
//! Deduplicated, timestamp-ordered storage for the decrypted view of each
//! conversation, plus the per-conversation typing roster. Purely in-memory;
//! the relay's stored history is the durable copy.

use std::collections::{HashMap, VecDeque};

use hushwire_proto::MessageKind;

use crate::conversation::{ConversationId, UserId};

/// Maximum typists tracked per conversation.
pub const MAX_TYPISTS: usize = 3;

/// Delivery progress of one message, strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageStatus {
    /// Accepted locally and handed to the transport.
    Sent,
    /// The relay confirmed storage.
    Delivered,
    /// The peer's client displayed the message.
    Seen,
}

/// Identity of one message inside a conversation.
///
/// The relay numbers stored messages; live frames may arrive before a
/// number exists, so those fall back to a (timestamp, sender) pair. A
/// relay echo or history sync replaces derived identities with server
/// ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Relay-assigned id.
    Server(u64),
    /// Synthesized identity for messages the relay has not numbered yet.
    Derived {
        /// Sender-side Unix milliseconds.
        timestamp: u64,
        /// Sending account.
        sender: UserId,
    },
}

/// One message in a conversation, after decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Stable identity for deduplication and receipts.
    pub id: MessageId,
    /// Sending account.
    pub sender: UserId,
    /// Receiving account.
    pub receiver: UserId,
    /// Decrypted content, or the undecryptable placeholder.
    pub content: String,
    /// Content kind.
    pub kind: MessageKind,
    /// Sender-side Unix milliseconds.
    pub timestamp: u64,
    /// Delivery progress.
    pub status: MessageStatus,
}

/// Outcome of a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    /// Status advanced.
    Updated,
    /// Message exists and already had an equal or later status.
    Unchanged,
    /// No message with that id in the conversation.
    NotFound,
}

/// Per-conversation message collections.
///
/// Invariants:
/// - one entry per [`MessageId`] (inserting a duplicate is a no-op)
/// - a server-numbered copy of a derived-id message adopts the id in place
/// - messages ordered by timestamp, equal timestamps by arrival
/// - status only moves forward (a late `delivered` never undoes `seen`)
#[derive(Debug, Default)]
pub struct MessageStore {
    conversations: HashMap<ConversationId, Vec<Message>>,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message, keeping timestamp order.
    ///
    /// Returns `false` without changing anything when the id is already
    /// present.
    pub fn add_message(&mut self, conversation: ConversationId, message: Message) -> bool {
        let messages = self.conversations.entry(conversation).or_default();
        if messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        // A relay echo of a message held under a derived id carries the
        // same timestamp and sender; it adopts the id instead of
        // duplicating the message.
        if matches!(message.id, MessageId::Server(_)) {
            let derived =
                MessageId::Derived { timestamp: message.timestamp, sender: message.sender };
            if let Some(existing) = messages.iter_mut().find(|m| m.id == derived) {
                existing.id = message.id;
                existing.status = existing.status.max(message.status);
                return true;
            }
        }
        // After the run of equal timestamps, so arrival order breaks ties.
        let at = messages.partition_point(|m| m.timestamp <= message.timestamp);
        messages.insert(at, message);
        true
    }

    /// Advance the status of one message.
    pub fn update_status(
        &mut self,
        conversation: ConversationId,
        id: MessageId,
        status: MessageStatus,
    ) -> StatusUpdate {
        let Some(message) = self
            .conversations
            .get_mut(&conversation)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == id))
        else {
            return StatusUpdate::NotFound;
        };
        if status <= message.status {
            return StatusUpdate::Unchanged;
        }
        message.status = status;
        StatusUpdate::Updated
    }

    /// Remove one message. Returns `false` when absent.
    pub fn delete_message(&mut self, conversation: ConversationId, id: MessageId) -> bool {
        let Some(messages) = self.conversations.get_mut(&conversation) else {
            return false;
        };
        let before = messages.len();
        messages.retain(|m| m.id != id);
        messages.len() != before
    }

    /// Replace a conversation's contents wholesale (history sync).
    ///
    /// The replacement is deduplicated and re-ordered under the same
    /// invariants as incremental inserts.
    pub fn set_messages(&mut self, conversation: ConversationId, messages: Vec<Message>) {
        self.conversations.remove(&conversation);
        for message in messages {
            self.add_message(conversation, message);
        }
    }

    /// Drop all state for one conversation.
    pub fn clear_conversation(&mut self, conversation: ConversationId) {
        self.conversations.remove(&conversation);
    }

    /// Drop everything (sign-out).
    pub fn clear_all(&mut self) {
        self.conversations.clear();
    }

    /// Messages of a conversation, oldest first.
    pub fn messages_for(&self, conversation: ConversationId) -> &[Message] {
        self.conversations.get(&conversation).map_or(&[], Vec::as_slice)
    }
}

/// Who is currently typing, per conversation.
///
/// Capped at the [`MAX_TYPISTS`] most recent distinct typists; a repeated
/// start signal moves the typist to the back instead of duplicating them,
/// and a newcomer beyond the cap evicts the oldest entry.
#[derive(Debug, Default)]
pub struct TypingState {
    typists: HashMap<ConversationId, VecDeque<String>>,
}

impl TypingState {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a start or stop signal.
    ///
    /// Returns `true` when the visible set of typists changed.
    pub fn set_typing(
        &mut self,
        conversation: ConversationId,
        username: &str,
        is_typing: bool,
    ) -> bool {
        let roster = self.typists.entry(conversation).or_default();
        let position = roster.iter().position(|name| name == username);
        let changed = match (is_typing, position) {
            (true, Some(at)) => {
                // Refresh recency; membership is unchanged.
                roster.remove(at);
                roster.push_back(username.to_string());
                false
            }
            (true, None) => {
                roster.push_back(username.to_string());
                if roster.len() > MAX_TYPISTS {
                    roster.pop_front();
                }
                true
            }
            (false, Some(at)) => {
                roster.remove(at);
                true
            }
            (false, None) => false,
        };
        if roster.is_empty() {
            self.typists.remove(&conversation);
        }
        changed
    }

    /// Current typists, oldest signal first.
    pub fn typists(&self, conversation: ConversationId) -> Vec<String> {
        self.typists
            .get(&conversation)
            .map(|roster| roster.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> ConversationId {
        ConversationId::between(UserId(1), UserId(2))
    }

    fn message(id: u64, timestamp: u64) -> Message {
        Message {
            id: MessageId::Server(id),
            sender: UserId(1),
            receiver: UserId(2),
            content: format!("msg {id}"),
            kind: MessageKind::Text,
            timestamp,
            status: MessageStatus::Sent,
        }
    }

    #[test]
    fn add_message_deduplicates_by_id() {
        let mut store = MessageStore::new();

        assert!(store.add_message(conv(), message(1, 100)));
        assert!(!store.add_message(conv(), message(1, 100)));
        // Same id with different metadata is still a duplicate.
        assert!(!store.add_message(conv(), message(1, 999)));

        assert_eq!(store.messages_for(conv()).len(), 1);
        assert_eq!(store.messages_for(conv())[0].timestamp, 100);
    }

    #[test]
    fn messages_stay_ordered_by_timestamp() {
        let mut store = MessageStore::new();

        store.add_message(conv(), message(3, 300));
        store.add_message(conv(), message(1, 100));
        store.add_message(conv(), message(2, 200));

        let timestamps: Vec<u64> =
            store.messages_for(conv()).iter().map(|m| m.timestamp).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut store = MessageStore::new();

        store.add_message(conv(), message(1, 100));
        store.add_message(conv(), message(2, 100));
        store.add_message(conv(), message(3, 100));

        let ids: Vec<MessageId> = store.messages_for(conv()).iter().map(|m| m.id).collect();
        assert_eq!(
            ids,
            vec![MessageId::Server(1), MessageId::Server(2), MessageId::Server(3)]
        );
    }

    #[test]
    fn relay_echo_adopts_the_server_id() {
        let mut store = MessageStore::new();
        let local = Message {
            id: MessageId::Derived { timestamp: 100, sender: UserId(1) },
            ..message(0, 100)
        };

        assert!(store.add_message(conv(), local));
        // The relay echoes the same message back once it has a number.
        assert!(store.add_message(conv(), message(7, 100)));

        let stored = store.messages_for(conv());
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, MessageId::Server(7));
    }

    #[test]
    fn echo_reconciliation_requires_matching_origin() {
        let mut store = MessageStore::new();
        let local = Message {
            id: MessageId::Derived { timestamp: 100, sender: UserId(1) },
            ..message(0, 100)
        };
        store.add_message(conv(), local);

        // A peer message in the same millisecond is a different message.
        let peer = Message { sender: UserId(2), receiver: UserId(1), ..message(8, 100) };
        assert!(store.add_message(conv(), peer));

        assert_eq!(store.messages_for(conv()).len(), 2);
    }

    #[test]
    fn update_status_moves_forward_only() {
        let mut store = MessageStore::new();
        store.add_message(conv(), message(1, 100));

        assert_eq!(
            store.update_status(conv(), MessageId::Server(1), MessageStatus::Seen),
            StatusUpdate::Updated
        );
        // A late delivered receipt must not undo seen.
        assert_eq!(
            store.update_status(conv(), MessageId::Server(1), MessageStatus::Delivered),
            StatusUpdate::Unchanged
        );

        assert_eq!(store.messages_for(conv())[0].status, MessageStatus::Seen);
    }

    #[test]
    fn update_status_reports_missing_messages() {
        let mut store = MessageStore::new();

        assert_eq!(
            store.update_status(conv(), MessageId::Server(9), MessageStatus::Delivered),
            StatusUpdate::NotFound
        );
    }

    #[test]
    fn delete_message_removes_only_the_target() {
        let mut store = MessageStore::new();
        store.add_message(conv(), message(1, 100));
        store.add_message(conv(), message(2, 200));

        assert!(store.delete_message(conv(), MessageId::Server(1)));
        assert!(!store.delete_message(conv(), MessageId::Server(1)));

        assert_eq!(store.messages_for(conv()).len(), 1);
        assert_eq!(store.messages_for(conv())[0].id, MessageId::Server(2));
    }

    #[test]
    fn set_messages_replaces_wholesale() {
        let mut store = MessageStore::new();
        store.add_message(conv(), message(1, 100));

        store.set_messages(conv(), vec![message(2, 50), message(3, 25), message(2, 50)]);

        let ids: Vec<MessageId> = store.messages_for(conv()).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![MessageId::Server(3), MessageId::Server(2)]);
    }

    #[test]
    fn clear_conversation_leaves_others_alone() {
        let mut store = MessageStore::new();
        let other = ConversationId::between(UserId(1), UserId(9));
        store.add_message(conv(), message(1, 100));
        store.add_message(other, message(2, 100));

        store.clear_conversation(conv());

        assert!(store.messages_for(conv()).is_empty());
        assert_eq!(store.messages_for(other).len(), 1);
    }

    #[test]
    fn clear_all_empties_every_conversation() {
        let mut store = MessageStore::new();
        let other = ConversationId::between(UserId(1), UserId(9));
        store.add_message(conv(), message(1, 100));
        store.add_message(other, message(2, 100));

        store.clear_all();

        assert!(store.messages_for(conv()).is_empty());
        assert!(store.messages_for(other).is_empty());
    }

    #[test]
    fn typing_roster_caps_at_three_distinct_typists() {
        let mut typing = TypingState::new();

        assert!(typing.set_typing(conv(), "alice", true));
        assert!(typing.set_typing(conv(), "bob", true));
        assert!(typing.set_typing(conv(), "carol", true));
        // A fourth typist evicts the oldest.
        assert!(typing.set_typing(conv(), "dave", true));

        assert_eq!(typing.typists(conv()), vec!["bob", "carol", "dave"]);
    }

    #[test]
    fn repeated_start_refreshes_recency_without_duplicating() {
        let mut typing = TypingState::new();
        typing.set_typing(conv(), "alice", true);
        typing.set_typing(conv(), "bob", true);

        // Alice signals again: no visible change, but she is now newest.
        assert!(!typing.set_typing(conv(), "alice", true));
        assert_eq!(typing.typists(conv()), vec!["bob", "alice"]);

        typing.set_typing(conv(), "carol", true);
        typing.set_typing(conv(), "dave", true);

        // Bob, the stalest, was evicted; refreshed alice survived.
        assert_eq!(typing.typists(conv()), vec!["alice", "carol", "dave"]);
    }

    #[test]
    fn stop_signal_removes_the_typist() {
        let mut typing = TypingState::new();
        typing.set_typing(conv(), "alice", true);

        assert!(typing.set_typing(conv(), "alice", false));
        assert!(!typing.set_typing(conv(), "alice", false));

        assert!(typing.typists(conv()).is_empty());
    }

    #[test]
    fn rosters_are_per_conversation() {
        let mut typing = TypingState::new();
        let other = ConversationId::between(UserId(1), UserId(9));

        typing.set_typing(conv(), "alice", true);
        typing.set_typing(other, "bob", true);

        assert_eq!(typing.typists(conv()), vec!["alice"]);
        assert_eq!(typing.typists(other), vec!["bob"]);
    }
}
