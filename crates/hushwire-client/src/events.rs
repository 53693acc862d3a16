//! Typed subscription buses for application callbacks.
//!
//! Each event family has its own bus so a UI can subscribe to exactly the
//! churn it renders. Delivery is unbounded per subscriber; a dropped
//! receiver is pruned on the next publish, so dropping the receiver is a
//! valid way to unsubscribe.

use hushwire_core::{
    conversation::{ConversationId, UserId},
    store::{MessageId, MessageStatus},
};
use tokio::sync::mpsc;

use crate::channel::{ChannelScope, ChannelState};

/// Identifier of one subscription, for explicit removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Broadcast bus for one event type.
#[derive(Debug)]
pub struct EventBus<T: Clone> {
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<T>)>,
    next_id: u64,
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self { subscribers: Vec::new(), next_id: 0 }
    }
}

impl<T: Clone> EventBus<T> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn subscribe(&mut self) -> (SubscriptionId, mpsc::UnboundedReceiver<T>) {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push((id, tx));
        (id, rx)
    }

    /// Remove a subscriber. Unknown ids are a no-op.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(existing, _)| *existing != id);
    }

    /// Deliver a value to every live subscriber.
    pub fn publish(&mut self, value: &T) {
        self.subscribers.retain(|(_, tx)| tx.send(value.clone()).is_ok());
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// True when nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// A conversation's visible messages changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationUpdate {
    /// Conversation to re-read from the client.
    pub conversation: ConversationId,
}

/// A receipt advanced one message's delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptUpdate {
    /// Conversation holding the message.
    pub conversation: ConversationId,
    /// Message the receipt named.
    pub id: MessageId,
    /// Status after the patch.
    pub status: MessageStatus,
}

/// The set of people typing in a conversation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUpdate {
    /// Conversation affected.
    pub conversation: ConversationId,
    /// Current typists, oldest signal first.
    pub typists: Vec<String>,
}

/// An account's last-seen timestamp advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceUpdate {
    /// Account that was seen.
    pub user: UserId,
    /// Unix milliseconds of the sighting.
    pub last_seen: u64,
}

/// A conversation's key handshake failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeAlert {
    /// Affected conversation.
    pub conversation: ConversationId,
    /// What went wrong.
    pub reason: String,
}

/// A channel changed connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelNotice {
    /// Which channel.
    pub scope: ChannelScope,
    /// New state.
    pub state: ChannelState,
}

/// All subscription buses of one signed-in client.
#[derive(Debug, Default)]
pub struct ClientEvents {
    /// Message store changes.
    pub conversations: EventBus<ConversationUpdate>,
    /// Receipt-driven status changes.
    pub receipts: EventBus<ReceiptUpdate>,
    /// Typing roster changes.
    pub typing: EventBus<TypingUpdate>,
    /// Presence changes.
    pub presence: EventBus<PresenceUpdate>,
    /// Failed handshakes.
    pub handshakes: EventBus<HandshakeAlert>,
    /// Channel state transitions.
    pub channels: EventBus<ChannelNotice>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_every_subscriber() {
        let mut bus = EventBus::new();
        let (_, mut first) = bus.subscribe();
        let (_, mut second) = bus.subscribe();

        bus.publish(&7u32);

        assert_eq!(first.try_recv(), Ok(7));
        assert_eq!(second.try_recv(), Ok(7));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut bus = EventBus::new();
        let (id, mut receiver) = bus.subscribe();

        bus.unsubscribe(id);
        bus.publish(&1u32);

        assert!(receiver.try_recv().is_err());
        assert!(bus.is_empty());
    }

    #[test]
    fn dropped_receivers_are_pruned_on_publish() {
        let mut bus = EventBus::new();
        let (_, receiver) = bus.subscribe();
        let (_, mut kept) = bus.subscribe();
        drop(receiver);

        bus.publish(&1u32);

        assert_eq!(bus.len(), 1);
        assert_eq!(kept.try_recv(), Ok(1));
    }

    #[test]
    fn subscription_ids_are_never_reused() {
        let mut bus = EventBus::<u32>::new();
        let (first, _first_rx) = bus.subscribe();
        bus.unsubscribe(first);

        let (second, _second_rx) = bus.subscribe();

        assert_ne!(first, second);
    }
}
