//! Signed-in chat client.
//!
//! [`ChatClient`] owns the account-wide channel, per-peer conversation
//! channels, and the synchronization core. A single pump task feeds
//! channel events into the coordinator; the actions it returns are
//! executed after the coordinator lock is released, so slow sends never
//! block frame handling.

use std::{collections::HashMap, sync::Arc};

use hushwire_core::{
    conversation::{ConversationId, UserId},
    coordinator::{SyncAction, SyncCoordinator, SyncEvent},
    env::Environment,
    keystore::{IdentityVault, KeyStore, KeyStoreError, VaultError},
    session::SessionPhase,
    store::Message,
};
use hushwire_crypto::{IdentityKeyPair, KEY_SIZE};
use hushwire_proto::{MessageKind, endpoint};
use tokio::sync::{Mutex, mpsc};

use crate::{
    channel::{ChannelConfig, ChannelEvent, ChannelHandle, ChannelScope, open_channel},
    directory::PeerKeyDirectory,
    error::ClientError,
    events::{
        ChannelNotice, ClientEvents, ConversationUpdate, HandshakeAlert, PresenceUpdate,
        ReceiptUpdate, TypingUpdate,
    },
};

/// Connection settings for one signed-in client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay base, e.g. `ws://127.0.0.1:9000`.
    pub socket_base: String,
    /// Auth token appended to every socket URL.
    pub token: String,
    /// Reconnection tuning shared by all channels.
    pub channel: ChannelConfig,
}

struct ChannelMap {
    global: ChannelHandle,
    conversations: HashMap<UserId, ChannelHandle>,
}

struct ClientInner<E: Environment, S: KeyStore, D: PeerKeyDirectory> {
    env: E,
    local_user: UserId,
    config: ClientConfig,
    vault: IdentityVault<S>,
    directory: D,
    coordinator: Mutex<SyncCoordinator<E>>,
    events: Mutex<ClientEvents>,
    channels: Mutex<ChannelMap>,
    channel_events: mpsc::UnboundedSender<(ChannelScope, ChannelEvent)>,
}

/// Handle to a signed-in account.
///
/// Cheap operations (reads, subscriptions) and event-driven work share
/// the same coordinator mutex; none of the methods block beyond it.
pub struct ChatClient<E: Environment, S: KeyStore, D: PeerKeyDirectory> {
    inner: Arc<ClientInner<E, S, D>>,
    pump: tokio::task::AbortHandle,
}

impl<E: Environment, S: KeyStore, D: PeerKeyDirectory> ChatClient<E, S, D> {
    /// Sign in as `local_user`, loading the identity key pair from the
    /// store or generating a fresh one for a first sign-in.
    ///
    /// Opens the account-wide channel immediately; conversation channels
    /// open on demand via [`open_conversation`](Self::open_conversation).
    ///
    /// # Errors
    /// Key store failures and corrupt stored identities.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn sign_in(
        env: E,
        store: S,
        directory: D,
        local_user: UserId,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let vault = IdentityVault::new(store, local_user.to_string());
        let identity = match vault.load_key_pair() {
            Ok(pair) => pair,
            Err(VaultError::Store(KeyStoreError::KeyNotFound { .. })) => {
                let mut seed = [0; KEY_SIZE];
                env.random_bytes(&mut seed);
                let pair = IdentityKeyPair::generate(seed);
                vault.store_key_pair(&pair)?;
                tracing::info!(%local_user, "generated a fresh identity key pair");
                pair
            }
            Err(err) => return Err(err.into()),
        };

        let coordinator = SyncCoordinator::new(env.clone(), local_user, identity);
        let (channel_events, events_rx) = mpsc::unbounded_channel();
        let global = open_channel(
            env.clone(),
            ChannelScope::Global,
            endpoint::global_url(&config.socket_base, &config.token),
            config.channel,
            channel_events.clone(),
        );

        let inner = Arc::new(ClientInner {
            env,
            local_user,
            config,
            vault,
            directory,
            coordinator: Mutex::new(coordinator),
            events: Mutex::new(ClientEvents::default()),
            channels: Mutex::new(ChannelMap { global, conversations: HashMap::new() }),
            channel_events,
        });
        let pump = tokio::spawn(pump_events(Arc::clone(&inner), events_rx)).abort_handle();
        Ok(Self { inner, pump })
    }

    /// Local account id.
    pub fn local_user(&self) -> UserId {
        self.inner.local_user
    }

    /// Hex-encoded public key of the local account.
    ///
    /// Peers can only initiate a conversation once this is registered in
    /// the key directory.
    pub async fn public_key_hex(&self) -> String {
        self.inner.coordinator.lock().await.local_public_key_hex()
    }

    /// Open the persistent channel to `peer`; a second call is a no-op
    /// while the first channel is still registered.
    pub async fn open_conversation(&self, peer: UserId) {
        let mut channels = self.inner.channels.lock().await;
        if channels.conversations.contains_key(&peer) {
            return;
        }
        let url = endpoint::conversation_url(
            &self.inner.config.socket_base,
            self.inner.local_user.0,
            peer.0,
            &self.inner.config.token,
        );
        let handle = open_channel(
            self.inner.env.clone(),
            ChannelScope::Conversation { peer },
            url,
            self.inner.config.channel,
            self.inner.channel_events.clone(),
        );
        channels.conversations.insert(peer, handle);
    }

    /// Close the channel to `peer`. Stored messages and the session stay.
    pub async fn close_conversation(&self, peer: UserId) {
        let handle = self.inner.channels.lock().await.conversations.remove(&peer);
        if let Some(handle) = handle {
            handle.close().await;
        }
    }

    /// Re-arm a parked channel, or shortcut a pending backoff delay.
    pub async fn retry_channel(&self, scope: ChannelScope) {
        let channels = self.inner.channels.lock().await;
        let handle = match scope {
            ChannelScope::Global => Some(&channels.global),
            ChannelScope::Conversation { peer } => channels.conversations.get(&peer),
        };
        match handle {
            Some(handle) => {
                if handle.retry().await.is_err() {
                    tracing::warn!(?scope, "retry on a vanished channel");
                }
            }
            None => tracing::warn!(?scope, "retry on a channel that was never opened"),
        }
    }

    /// Encrypt and send a message to `to`.
    ///
    /// While the conversation's handshake is still in flight the draft
    /// queues and dispatches once the session is ready.
    ///
    /// # Errors
    /// Coordinator rejections; none exist for plain sends today.
    pub async fn send_message(
        &self,
        to: UserId,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Result<(), ClientError> {
        self.dispatch(SyncEvent::SendMessage { to, content: content.into(), kind }).await
    }

    /// Signal that the local user started or stopped composing to `to`.
    ///
    /// # Errors
    /// Coordinator rejections; none exist for typing signals today.
    pub async fn set_typing(&self, to: UserId, is_typing: bool) -> Result<(), ClientError> {
        self.dispatch(SyncEvent::SetTyping { to, is_typing }).await
    }

    /// Report the conversation as read up to the server id `message_id`.
    ///
    /// # Errors
    /// When the local account is not a participant of `conversation`.
    pub async fn mark_seen(
        &self,
        conversation: ConversationId,
        message_id: u64,
    ) -> Result<(), ClientError> {
        self.dispatch(SyncEvent::MarkSeen { conversation, message_id }).await
    }

    /// Messages of a conversation, ascending by timestamp.
    pub async fn messages(&self, conversation: ConversationId) -> Vec<Message> {
        self.inner.coordinator.lock().await.store().messages_for(conversation).to_vec()
    }

    /// Current typists in a conversation, oldest signal first.
    pub async fn typists(&self, conversation: ConversationId) -> Vec<String> {
        self.inner.coordinator.lock().await.typists(conversation)
    }

    /// Last-seen wall clock of `user`, when an update has arrived.
    pub async fn last_seen(&self, user: UserId) -> Option<u64> {
        self.inner.coordinator.lock().await.last_seen(user)
    }

    /// Session phase of a conversation.
    pub async fn session_phase(&self, conversation: ConversationId) -> SessionPhase {
        self.inner.coordinator.lock().await.session_phase(conversation)
    }

    /// Conversations whose visible messages changed. Drop the receiver to
    /// unsubscribe.
    pub async fn subscribe_conversations(&self) -> mpsc::UnboundedReceiver<ConversationUpdate> {
        self.inner.events.lock().await.conversations.subscribe().1
    }

    /// Receipt-driven status changes. Drop the receiver to unsubscribe.
    pub async fn subscribe_receipts(&self) -> mpsc::UnboundedReceiver<ReceiptUpdate> {
        self.inner.events.lock().await.receipts.subscribe().1
    }

    /// Typing roster changes. Drop the receiver to unsubscribe.
    pub async fn subscribe_typing(&self) -> mpsc::UnboundedReceiver<TypingUpdate> {
        self.inner.events.lock().await.typing.subscribe().1
    }

    /// Last-seen updates. Drop the receiver to unsubscribe.
    pub async fn subscribe_presence(&self) -> mpsc::UnboundedReceiver<PresenceUpdate> {
        self.inner.events.lock().await.presence.subscribe().1
    }

    /// Failed-handshake alerts. Drop the receiver to unsubscribe.
    pub async fn subscribe_handshakes(&self) -> mpsc::UnboundedReceiver<HandshakeAlert> {
        self.inner.events.lock().await.handshakes.subscribe().1
    }

    /// Channel state changes. Drop the receiver to unsubscribe.
    pub async fn subscribe_channels(&self) -> mpsc::UnboundedReceiver<ChannelNotice> {
        self.inner.events.lock().await.channels.subscribe().1
    }

    /// Close every channel and stop the event pump.
    pub async fn shutdown(self) {
        let mut channels = self.inner.channels.lock().await;
        channels.global.close().await;
        for (_, handle) in channels.conversations.drain() {
            handle.close().await;
        }
        drop(channels);
        self.pump.abort();
    }

    /// Run one coordinator step and execute the resulting actions.
    async fn dispatch(&self, event: SyncEvent) -> Result<(), ClientError> {
        let actions = self.inner.coordinator.lock().await.handle(event)?;
        execute_actions(&self.inner, actions).await;
        Ok(())
    }
}

impl<E: Environment, S: KeyStore, D: PeerKeyDirectory> Drop for ChatClient<E, S, D> {
    fn drop(&mut self) {
        // Dropping the inner Arc closes every channel's command queue;
        // the pump would otherwise outlive the handle.
        self.pump.abort();
    }
}

async fn execute_actions<E, S, D>(inner: &Arc<ClientInner<E, S, D>>, actions: Vec<SyncAction>)
where
    E: Environment,
    S: KeyStore,
    D: PeerKeyDirectory,
{
    for action in actions {
        match action {
            SyncAction::SendFrame { peer, frame } => {
                let channels = inner.channels.lock().await;
                match channels.conversations.get(&peer) {
                    Some(handle) => {
                        if handle.send(&frame).await.is_err() {
                            tracing::warn!(%peer, "conversation channel gone; frame dropped");
                        }
                    }
                    None => tracing::warn!(%peer, "no conversation channel open; frame dropped"),
                }
            }
            SyncAction::ResolvePeerKey { peer } => spawn_resolve(Arc::clone(inner), peer),
            SyncAction::NotifyHandshakeFailed { conversation, reason } => {
                tracing::warn!(%conversation, "handshake failed: {reason}");
                let alert = HandshakeAlert { conversation, reason };
                inner.events.lock().await.handshakes.publish(&alert);
            }
            SyncAction::ConversationUpdated { conversation } => {
                let update = ConversationUpdate { conversation };
                inner.events.lock().await.conversations.publish(&update);
            }
            SyncAction::StatusChanged { conversation, id, status } => {
                let update = ReceiptUpdate { conversation, id, status };
                inner.events.lock().await.receipts.publish(&update);
            }
            SyncAction::TypingChanged { conversation, typists } => {
                let update = TypingUpdate { conversation, typists };
                inner.events.lock().await.typing.publish(&update);
            }
            SyncAction::PresenceChanged { user, last_seen } => {
                let update = PresenceUpdate { user, last_seen };
                inner.events.lock().await.presence.publish(&update);
            }
            SyncAction::Log { message } => tracing::debug!("{message}"),
        }
    }
}

/// Fetch a peer key off-task and feed the outcome back as an event.
fn spawn_resolve<E, S, D>(inner: Arc<ClientInner<E, S, D>>, peer: UserId)
where
    E: Environment,
    S: KeyStore,
    D: PeerKeyDirectory,
{
    tokio::spawn(async move {
        let event = match inner.directory.fetch_public_key(peer).await {
            Ok(fetched) => {
                let public_key_hex = reconcile_peer_key(&inner.vault, peer, fetched);
                SyncEvent::PeerKeyResolved { peer, public_key_hex }
            }
            Err(err) => SyncEvent::PeerKeyFailed { peer, reason: err.to_string() },
        };
        let Ok(actions) = inner.coordinator.lock().await.handle(event) else {
            unreachable!("key resolution events cannot fail");
        };
        execute_actions(&inner, actions).await;
    });
}

/// Remember the fetched key, warning when it moved since last contact.
fn reconcile_peer_key<S: KeyStore>(
    vault: &IdentityVault<S>,
    peer: UserId,
    fetched: String,
) -> String {
    let canonical = fetched.to_ascii_lowercase();
    match vault.remembered_peer_key(peer) {
        Ok(Some(previous)) if previous != canonical => {
            tracing::warn!(%peer, "peer public key changed since last contact");
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(%peer, "peer key cache read failed: {err}"),
    }
    if let Err(err) = vault.remember_peer_key(peer, &canonical) {
        tracing::warn!(%peer, "peer key cache write failed: {err}");
    }
    canonical
}

async fn pump_events<E, S, D>(
    inner: Arc<ClientInner<E, S, D>>,
    mut events_rx: mpsc::UnboundedReceiver<(ChannelScope, ChannelEvent)>,
) where
    E: Environment,
    S: KeyStore,
    D: PeerKeyDirectory,
{
    while let Some((scope, event)) = events_rx.recv().await {
        match event {
            ChannelEvent::State(state) => {
                tracing::debug!(?scope, ?state, "channel state changed");
                let notice = ChannelNotice { scope, state };
                inner.events.lock().await.channels.publish(&notice);
            }
            ChannelEvent::Frame(frame) => {
                let event = match scope {
                    ChannelScope::Conversation { peer } => {
                        SyncEvent::ConversationFrame { peer, frame }
                    }
                    ChannelScope::Global => SyncEvent::GlobalFrame { frame },
                };
                let Ok(actions) = inner.coordinator.lock().await.handle(event) else {
                    unreachable!("frame events cannot fail");
                };
                execute_actions(&inner, actions).await;
            }
        }
    }
}
