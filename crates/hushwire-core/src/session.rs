//! Per-conversation encryption sessions.
//!
//! One session per conversation, created the first time traffic needs it
//! and kept for the life of the process. The shared secret is derived once
//! from the long-term keys and replaced only when the peer's public key
//! turns out to have changed.

use std::collections::HashMap;

use hushwire_crypto::{IdentityKeyPair, PublicKey, SharedSecret, establish};

use crate::conversation::ConversationId;

/// Handshake progress for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No key material requested yet.
    NoSession,
    /// Peer key lookup in flight; traffic queues.
    Handshaking,
    /// Shared secret established; traffic flows.
    Ready,
}

/// How [`SessionRegistry::establish`] changed the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Establishment {
    /// First secret for this conversation.
    New,
    /// Peer key changed; the old secret was discarded.
    Rekeyed,
    /// Same peer key as before; the existing secret was kept.
    Unchanged,
}

struct PeerSession {
    peer_public: PublicKey,
    secret: SharedSecret,
}

/// All conversation sessions for one signed-in account.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConversationId, SessionState>,
}

enum SessionState {
    Handshaking,
    Ready(PeerSession),
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase of a conversation's session.
    pub fn phase(&self, conversation: ConversationId) -> SessionPhase {
        match self.sessions.get(&conversation) {
            None => SessionPhase::NoSession,
            Some(SessionState::Handshaking) => SessionPhase::Handshaking,
            Some(SessionState::Ready(_)) => SessionPhase::Ready,
        }
    }

    /// Mark the peer key lookup as in flight.
    ///
    /// An already-ready session is left alone; re-marking an in-flight
    /// handshake is a no-op.
    pub fn begin_handshake(&mut self, conversation: ConversationId) {
        self.sessions.entry(conversation).or_insert(SessionState::Handshaking);
    }

    /// Install the shared secret derived from `local` and `peer_public`.
    ///
    /// Keeps the existing secret when the peer key is unchanged, so an
    /// established conversation survives repeated lookups.
    pub fn establish(
        &mut self,
        conversation: ConversationId,
        local: &IdentityKeyPair,
        peer_public: PublicKey,
    ) -> Establishment {
        let outcome = match self.sessions.get(&conversation) {
            Some(SessionState::Ready(session)) if session.peer_public == peer_public => {
                return Establishment::Unchanged;
            }
            Some(SessionState::Ready(_)) => Establishment::Rekeyed,
            _ => Establishment::New,
        };
        let secret = establish(local, &peer_public);
        self.sessions
            .insert(conversation, SessionState::Ready(PeerSession { peer_public, secret }));
        outcome
    }

    /// Shared secret of a ready session.
    pub fn secret(&self, conversation: ConversationId) -> Option<&SharedSecret> {
        match self.sessions.get(&conversation) {
            Some(SessionState::Ready(session)) => Some(&session.secret),
            _ => None,
        }
    }

    /// Drop a conversation's session entirely (failed lookup).
    ///
    /// The next piece of traffic starts a fresh handshake.
    pub fn invalidate(&mut self, conversation: ConversationId) {
        self.sessions.remove(&conversation);
    }
}
