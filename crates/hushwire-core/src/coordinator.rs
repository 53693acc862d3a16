//! Conversation synchronization state machine.
//!
//! Glues sessions, crypto, and the message store together without touching
//! a socket. The driver feeds [`SyncEvent`]s in and executes the returned
//! [`SyncAction`]s; everything in between is deterministic.
//!
//! # Session lifecycle
//!
//! ```text
//! ┌───────────┐ first traffic ┌─────────────┐ PeerKeyResolved ┌───────┐
//! │ NoSession │──────────────>│ Handshaking │────────────────>│ Ready │
//! └───────────┘               └─────────────┘                 └───────┘
//!       ▲                            │ PeerKeyFailed              │
//!       │                            ▼                            ▼
//!       └──────────── warn once, drain queues as          re-keyed only if
//!                     placeholders, allow retry           the peer key moved
//! ```
//!
//! While a conversation is `Handshaking`, inbound ciphertext, history
//! snapshots, and local drafts all queue in arrival order and replay
//! through the exact same code paths once the secret lands.

use std::collections::{HashMap, HashSet};

use hushwire_crypto::{
    CryptoError, IV_SIZE, IdentityKeyPair, KEY_SIZE, SharedSecret, decrypt, derive_message_key,
    encrypt, ephemeral_public_key, iv_from_hex, public_key_from_hex,
};
use hushwire_proto::{InboundFrame, MessageKind, MessagePayload, OutboundFrame, SendPayload};
use thiserror::Error;

use crate::{
    conversation::{ConversationId, UserId},
    env::Environment,
    session::{Establishment, SessionPhase, SessionRegistry},
    store::{Message, MessageId, MessageStatus, MessageStore, StatusUpdate, TypingState},
};

/// Content stored in place of a message that could not be decrypted.
pub const UNDECRYPTABLE_PLACEHOLDER: &str = "[unable to decrypt]";

/// Errors from coordinator event processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Event referenced a conversation the local account is not part of
    #[error("not a participant in conversation {conversation}")]
    NotParticipant {
        /// Conversation named by the event.
        conversation: ConversationId,
    },
}

/// Events the driver feeds into the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Frame arrived on the channel bound to one peer.
    ConversationFrame {
        /// Peer the channel is bound to.
        peer: UserId,
        /// Parsed frame.
        frame: InboundFrame,
    },
    /// Frame arrived on the account-wide channel.
    GlobalFrame {
        /// Parsed frame.
        frame: InboundFrame,
    },
    /// Application wants to send a message.
    SendMessage {
        /// Receiving account.
        to: UserId,
        /// Plaintext content.
        content: String,
        /// Content kind.
        kind: MessageKind,
    },
    /// Application started or stopped composing.
    SetTyping {
        /// Peer being typed at.
        to: UserId,
        /// True while composing.
        is_typing: bool,
    },
    /// Application displayed a conversation up to one message.
    MarkSeen {
        /// Conversation that was read.
        conversation: ConversationId,
        /// Server id of the newest message read.
        message_id: u64,
    },
    /// Peer key lookup completed.
    PeerKeyResolved {
        /// Peer the lookup was for.
        peer: UserId,
        /// Hex-encoded X25519 public key.
        public_key_hex: String,
    },
    /// Peer key lookup failed.
    PeerKeyFailed {
        /// Peer the lookup was for.
        peer: UserId,
        /// What went wrong.
        reason: String,
    },
}

/// Actions the coordinator hands back for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Send a frame on the channel bound to `peer`.
    SendFrame {
        /// Peer whose channel carries the frame.
        peer: UserId,
        /// Frame to encode and send.
        frame: OutboundFrame,
    },
    /// Fetch the peer's public key and feed the result back as
    /// [`SyncEvent::PeerKeyResolved`] or [`SyncEvent::PeerKeyFailed`].
    ResolvePeerKey {
        /// Peer to look up.
        peer: UserId,
    },
    /// Surface a failed conversation handshake to the user.
    ///
    /// Emitted once per conversation until a later lookup succeeds.
    NotifyHandshakeFailed {
        /// Affected conversation.
        conversation: ConversationId,
        /// What went wrong.
        reason: String,
    },
    /// A conversation's visible messages changed; re-read the store.
    ConversationUpdated {
        /// Conversation to re-render.
        conversation: ConversationId,
    },
    /// A receipt from the relay advanced one message's status.
    StatusChanged {
        /// Conversation holding the message.
        conversation: ConversationId,
        /// Message the receipt named.
        id: MessageId,
        /// Status after the patch.
        status: MessageStatus,
    },
    /// The typing roster of a conversation changed.
    TypingChanged {
        /// Conversation affected.
        conversation: ConversationId,
        /// Current typists, oldest signal first.
        typists: Vec<String>,
    },
    /// An account's last-seen timestamp advanced.
    PresenceChanged {
        /// Account that was seen.
        user: UserId,
        /// Unix milliseconds of the sighting.
        last_seen: u64,
    },
    /// Record a diagnostic for the driver's logger.
    Log {
        /// Log line.
        message: String,
    },
}

/// A message drafted locally, waiting for its session.
#[derive(Debug, Clone)]
struct Draft {
    to: UserId,
    content: String,
    kind: MessageKind,
}

/// Traffic parked while a conversation's handshake is in flight.
#[derive(Debug, Clone)]
enum Pending {
    Inbound(MessagePayload),
    History(Vec<MessagePayload>),
    Outbound(Draft),
}

/// Sans-IO synchronization core for one signed-in account.
pub struct SyncCoordinator<E: Environment> {
    env: E,
    local_user: UserId,
    identity: IdentityKeyPair,
    sessions: SessionRegistry,
    store: MessageStore,
    typing: TypingState,
    /// Arrival-ordered queues, keyed by the conversation still handshaking.
    pending: HashMap<ConversationId, Vec<Pending>>,
    /// Conversations already notified about a failed handshake.
    handshake_warned: HashSet<ConversationId>,
    /// Latest last-seen timestamp per account.
    presence: HashMap<UserId, u64>,
}

impl<E: Environment> SyncCoordinator<E> {
    /// Coordinator for `local_user`, signing with `identity`.
    pub fn new(env: E, local_user: UserId, identity: IdentityKeyPair) -> Self {
        Self {
            env,
            local_user,
            identity,
            sessions: SessionRegistry::new(),
            store: MessageStore::new(),
            typing: TypingState::new(),
            pending: HashMap::new(),
            handshake_warned: HashSet::new(),
            presence: HashMap::new(),
        }
    }

    /// Local account id.
    pub fn local_user(&self) -> UserId {
        self.local_user
    }

    /// Hex-encoded public key of the local account.
    pub fn local_public_key_hex(&self) -> String {
        self.identity.public_hex()
    }

    /// Read access to the message store.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Session phase of a conversation.
    pub fn session_phase(&self, conversation: ConversationId) -> SessionPhase {
        self.sessions.phase(conversation)
    }

    /// Current typists in a conversation, oldest signal first.
    pub fn typists(&self, conversation: ConversationId) -> Vec<String> {
        self.typing.typists(conversation)
    }

    /// Last-seen Unix milliseconds for an account, if known.
    pub fn last_seen(&self, user: UserId) -> Option<u64> {
        self.presence.get(&user).copied()
    }

    /// Process one event and return the actions to execute.
    pub fn handle(&mut self, event: SyncEvent) -> Result<Vec<SyncAction>, SyncError> {
        match event {
            SyncEvent::ConversationFrame { peer, frame } => Ok(self.route_frame(Some(peer), frame)),
            SyncEvent::GlobalFrame { frame } => Ok(self.route_frame(None, frame)),
            SyncEvent::SendMessage { to, content, kind } => Ok(self.send_message(to, content, kind)),
            SyncEvent::SetTyping { to, is_typing } => Ok(vec![SyncAction::SendFrame {
                peer: to,
                frame: OutboundFrame::Typing { receiver: to.0, is_typing },
            }]),
            SyncEvent::MarkSeen { conversation, message_id } => {
                self.mark_seen(conversation, message_id)
            }
            SyncEvent::PeerKeyResolved { peer, public_key_hex } => {
                Ok(self.peer_key_resolved(peer, &public_key_hex))
            }
            SyncEvent::PeerKeyFailed { peer, reason } => {
                let conversation = ConversationId::between(self.local_user, peer);
                Ok(self.fail_handshake(conversation, peer, &reason))
            }
        }
    }

    fn route_frame(&mut self, channel_peer: Option<UserId>, frame: InboundFrame) -> Vec<SyncAction> {
        match frame {
            InboundFrame::Message(payload) => {
                let peer = channel_peer.unwrap_or_else(|| self.counterpart_of(&payload));
                self.accept_message(peer, payload)
            }
            InboundFrame::MessageHistory { messages } => {
                let peer =
                    channel_peer.or_else(|| messages.first().map(|p| self.counterpart_of(p)));
                match peer {
                    Some(peer) => self.accept_history(peer, messages),
                    None => vec![SyncAction::Log {
                        message: "empty history frame with no conversation context".to_string(),
                    }],
                }
            }
            InboundFrame::MessageDelivered { chat_id, message_id } => {
                self.apply_receipt(&chat_id, message_id, MessageStatus::Delivered)
            }
            InboundFrame::MessageSeen { chat_id, message_id } => {
                self.apply_receipt(&chat_id, message_id, MessageStatus::Seen)
            }
            InboundFrame::Typing { chat_id, username, is_typing } => {
                self.apply_typing(&chat_id, &username, is_typing)
            }
            InboundFrame::LastSeenUpdate { user_id, username, last_seen } => {
                self.apply_presence(user_id, username.as_deref(), last_seen)
            }
        }
    }

    /// The non-local participant of a payload, for frames that arrive
    /// without a channel binding.
    fn counterpart_of(&self, payload: &MessagePayload) -> UserId {
        if payload.sender == self.local_user.0 {
            UserId(payload.receiver)
        } else {
            UserId(payload.sender)
        }
    }

    fn send_message(&mut self, to: UserId, content: String, kind: MessageKind) -> Vec<SyncAction> {
        let conversation = ConversationId::between(self.local_user, to);
        let draft = Draft { to, content, kind };
        match self.sessions.phase(conversation) {
            SessionPhase::Ready => {
                let Some(secret) = self.sessions.secret(conversation).cloned() else {
                    unreachable!("ready session always has a secret");
                };
                self.dispatch_draft(&secret, draft)
            }
            SessionPhase::Handshaking => {
                self.enqueue(conversation, Pending::Outbound(draft));
                Vec::new()
            }
            SessionPhase::NoSession => {
                self.enqueue(conversation, Pending::Outbound(draft));
                self.sessions.begin_handshake(conversation);
                vec![SyncAction::ResolvePeerKey { peer: to }]
            }
        }
    }

    fn accept_message(&mut self, peer: UserId, payload: MessagePayload) -> Vec<SyncAction> {
        let conversation = ConversationId::between(self.local_user, peer);
        match self.sessions.phase(conversation) {
            SessionPhase::Ready => {
                let Some(secret) = self.sessions.secret(conversation).cloned() else {
                    unreachable!("ready session always has a secret");
                };
                self.absorb_message(&secret, conversation, payload)
            }
            SessionPhase::Handshaking => {
                self.enqueue(conversation, Pending::Inbound(payload));
                Vec::new()
            }
            SessionPhase::NoSession => {
                self.enqueue(conversation, Pending::Inbound(payload));
                self.sessions.begin_handshake(conversation);
                vec![SyncAction::ResolvePeerKey { peer }]
            }
        }
    }

    fn accept_history(&mut self, peer: UserId, messages: Vec<MessagePayload>) -> Vec<SyncAction> {
        let conversation = ConversationId::between(self.local_user, peer);
        match self.sessions.phase(conversation) {
            SessionPhase::Ready => {
                let Some(secret) = self.sessions.secret(conversation).cloned() else {
                    unreachable!("ready session always has a secret");
                };
                self.absorb_history(&secret, conversation, messages)
            }
            SessionPhase::Handshaking => {
                self.enqueue(conversation, Pending::History(messages));
                Vec::new()
            }
            SessionPhase::NoSession => {
                self.enqueue(conversation, Pending::History(messages));
                self.sessions.begin_handshake(conversation);
                vec![SyncAction::ResolvePeerKey { peer }]
            }
        }
    }

    fn mark_seen(
        &mut self,
        conversation: ConversationId,
        message_id: u64,
    ) -> Result<Vec<SyncAction>, SyncError> {
        if !conversation.involves(self.local_user) {
            return Err(SyncError::NotParticipant { conversation });
        }
        let peer = conversation.peer_of(self.local_user);
        let mut actions = vec![SyncAction::SendFrame {
            peer,
            frame: OutboundFrame::MessageSeen {
                chat_id: conversation.to_string(),
                message_id,
            },
        }];
        let receipt =
            self.store
                .update_status(conversation, MessageId::Server(message_id), MessageStatus::Seen);
        match receipt {
            StatusUpdate::Updated => {
                actions.push(SyncAction::ConversationUpdated { conversation });
            }
            StatusUpdate::Unchanged => {}
            StatusUpdate::NotFound => actions.push(SyncAction::Log {
                message: format!("marking unknown message {message_id} seen in {conversation}"),
            }),
        }
        Ok(actions)
    }

    fn peer_key_resolved(&mut self, peer: UserId, public_key_hex: &str) -> Vec<SyncAction> {
        let conversation = ConversationId::between(self.local_user, peer);
        let peer_public = match public_key_from_hex(public_key_hex) {
            Ok(key) => key,
            Err(err) => return self.fail_handshake(conversation, peer, &err.to_string()),
        };

        let outcome = self.sessions.establish(conversation, &self.identity, peer_public);
        self.handshake_warned.remove(&conversation);
        let Some(secret) = self.sessions.secret(conversation).cloned() else {
            unreachable!("establish always leaves the session ready");
        };

        let mut actions = Vec::new();
        if outcome == Establishment::Rekeyed {
            actions.push(SyncAction::Log {
                message: format!("peer key changed; conversation {conversation} re-keyed"),
            });
        }
        for entry in self.pending.remove(&conversation).unwrap_or_default() {
            match entry {
                Pending::Inbound(payload) => {
                    actions.extend(self.absorb_message(&secret, conversation, payload));
                }
                Pending::History(messages) => {
                    actions.extend(self.absorb_history(&secret, conversation, messages));
                }
                Pending::Outbound(draft) => {
                    actions.extend(self.dispatch_draft(&secret, draft));
                }
            }
        }
        actions
    }

    fn fail_handshake(
        &mut self,
        conversation: ConversationId,
        peer: UserId,
        reason: &str,
    ) -> Vec<SyncAction> {
        self.sessions.invalidate(conversation);

        let mut actions = Vec::new();
        if self.handshake_warned.insert(conversation) {
            actions.push(SyncAction::NotifyHandshakeFailed {
                conversation,
                reason: reason.to_string(),
            });
        } else {
            actions.push(SyncAction::Log {
                message: format!("handshake failed again for {conversation}: {reason}"),
            });
        }

        // Inbound traffic surfaces as placeholders; drafts cannot be
        // encrypted and are dropped loudly.
        for entry in self.pending.remove(&conversation).unwrap_or_default() {
            match entry {
                Pending::Inbound(payload) => {
                    let message = to_message(&payload, UNDECRYPTABLE_PLACEHOLDER.to_string());
                    if self.store.add_message(conversation, message) {
                        actions.push(SyncAction::ConversationUpdated { conversation });
                    }
                }
                Pending::History(messages) => {
                    let placeholders = messages
                        .iter()
                        .map(|payload| to_message(payload, UNDECRYPTABLE_PLACEHOLDER.to_string()))
                        .collect();
                    self.store.set_messages(conversation, placeholders);
                    actions.push(SyncAction::ConversationUpdated { conversation });
                }
                Pending::Outbound(_) => {
                    actions.push(SyncAction::Log {
                        message: format!("dropping unsent draft to {peer}: {reason}"),
                    });
                }
            }
        }
        actions
    }

    fn dispatch_draft(&mut self, secret: &SharedSecret, draft: Draft) -> Vec<SyncAction> {
        let conversation = ConversationId::between(self.local_user, draft.to);

        let mut ephemeral_seed = [0u8; KEY_SIZE];
        self.env.random_bytes(&mut ephemeral_seed);
        let ephemeral = ephemeral_public_key(ephemeral_seed);
        let mut iv = [0u8; IV_SIZE];
        self.env.random_bytes(&mut iv);

        let key = derive_message_key(secret, &ephemeral);
        let ciphertext = encrypt(draft.content.as_bytes(), &key, &iv);
        let timestamp = self.env.unix_millis();

        let payload = SendPayload {
            message: ciphertext,
            nonce: hex::encode(iv),
            ephemeral_key: hex::encode(ephemeral.as_bytes()),
            message_type: draft.kind,
            receiver: draft.to.0,
            timestamp,
        };
        let own_copy = Message {
            id: MessageId::Derived { timestamp, sender: self.local_user },
            sender: self.local_user,
            receiver: draft.to,
            content: draft.content,
            kind: draft.kind,
            timestamp,
            status: MessageStatus::Sent,
        };

        let mut actions = vec![SyncAction::SendFrame {
            peer: draft.to,
            frame: OutboundFrame::Send(payload),
        }];
        if self.store.add_message(conversation, own_copy) {
            actions.push(SyncAction::ConversationUpdated { conversation });
        } else {
            actions.push(SyncAction::Log {
                message: format!("duplicate local copy suppressed in {conversation}"),
            });
        }
        actions
    }

    fn absorb_message(
        &mut self,
        secret: &SharedSecret,
        conversation: ConversationId,
        payload: MessagePayload,
    ) -> Vec<SyncAction> {
        let mut actions = Vec::new();
        let content = match decrypt_content(secret, &payload) {
            Ok(content) => content,
            Err(err) => {
                actions.push(SyncAction::Log {
                    message: format!("undecryptable message in {conversation}: {err}"),
                });
                UNDECRYPTABLE_PLACEHOLDER.to_string()
            }
        };
        if self.store.add_message(conversation, to_message(&payload, content)) {
            actions.push(SyncAction::ConversationUpdated { conversation });
        }
        actions
    }

    fn absorb_history(
        &mut self,
        secret: &SharedSecret,
        conversation: ConversationId,
        payloads: Vec<MessagePayload>,
    ) -> Vec<SyncAction> {
        let mut failures = 0usize;
        let messages = payloads
            .iter()
            .map(|payload| {
                let content = decrypt_content(secret, payload).unwrap_or_else(|_| {
                    failures += 1;
                    UNDECRYPTABLE_PLACEHOLDER.to_string()
                });
                to_message(payload, content)
            })
            .collect();
        self.store.set_messages(conversation, messages);

        let mut actions = Vec::new();
        if failures > 0 {
            actions.push(SyncAction::Log {
                message: format!("history for {conversation}: {failures} undecryptable"),
            });
        }
        actions.push(SyncAction::ConversationUpdated { conversation });
        actions
    }

    fn apply_receipt(
        &mut self,
        chat_id: &str,
        message_id: u64,
        status: MessageStatus,
    ) -> Vec<SyncAction> {
        let Ok(conversation) = chat_id.parse::<ConversationId>() else {
            return vec![SyncAction::Log {
                message: format!("receipt with invalid chat id {chat_id:?}"),
            }];
        };
        match self.store.update_status(conversation, MessageId::Server(message_id), status) {
            StatusUpdate::Updated => vec![
                SyncAction::StatusChanged {
                    conversation,
                    id: MessageId::Server(message_id),
                    status,
                },
                SyncAction::ConversationUpdated { conversation },
            ],
            StatusUpdate::Unchanged => Vec::new(),
            StatusUpdate::NotFound => vec![SyncAction::Log {
                message: format!("receipt for unknown message {message_id} in {conversation}"),
            }],
        }
    }

    fn apply_typing(&mut self, chat_id: &str, username: &str, is_typing: bool) -> Vec<SyncAction> {
        let Ok(conversation) = chat_id.parse::<ConversationId>() else {
            return vec![SyncAction::Log {
                message: format!("typing frame with invalid chat id {chat_id:?}"),
            }];
        };
        if self.typing.set_typing(conversation, username, is_typing) {
            vec![SyncAction::TypingChanged {
                conversation,
                typists: self.typing.typists(conversation),
            }]
        } else {
            Vec::new()
        }
    }

    fn apply_presence(
        &mut self,
        user_id: Option<u64>,
        username: Option<&str>,
        last_seen: u64,
    ) -> Vec<SyncAction> {
        let Some(user_id) = user_id else {
            return vec![SyncAction::Log {
                message: format!("presence update without user id (username: {username:?})"),
            }];
        };
        let user = UserId(user_id);
        match self.presence.get(&user) {
            Some(&known) if known >= last_seen => Vec::new(),
            _ => {
                self.presence.insert(user, last_seen);
                vec![SyncAction::PresenceChanged { user, last_seen }]
            }
        }
    }

    fn enqueue(&mut self, conversation: ConversationId, entry: Pending) {
        self.pending.entry(conversation).or_default().push(entry);
    }
}

/// Decrypt one payload under the conversation secret.
fn decrypt_content(secret: &SharedSecret, payload: &MessagePayload) -> Result<String, CryptoError> {
    let ephemeral = public_key_from_hex(&payload.ephemeral_key)?;
    let iv = iv_from_hex(&payload.nonce)?;
    let key = derive_message_key(secret, &ephemeral);
    let plaintext = decrypt(&payload.message, &key, &iv)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed {
        reason: "plaintext is not UTF-8".to_string(),
    })
}

/// Store view of a wire payload with resolved content.
fn to_message(payload: &MessagePayload, content: String) -> Message {
    Message {
        id: payload.id.map_or(
            MessageId::Derived {
                timestamp: payload.timestamp,
                sender: UserId(payload.sender),
            },
            MessageId::Server,
        ),
        sender: UserId(payload.sender),
        receiver: UserId(payload.receiver),
        content,
        kind: payload.message_type,
        timestamp: payload.timestamp,
        status: MessageStatus::Sent,
    }
}
