//! Two signed-in clients exchanging end-to-end encrypted traffic through
//! a loopback relay.
//!
//! The relay never sees key material, so everything the peers read in
//! plaintext here proves the full pipeline: key directory lookup, session
//! establishment, per-message encryption, relay fan-out, and decryption
//! on the far side.

use std::time::Duration;

use hushwire_client::{
    ChannelConfig, ChannelNotice, ChannelScope, ChannelState, ChatClient, ClientConfig,
    ConversationId, ConversationUpdate, MemoryDirectory, MemoryKeyStore, Message, MessageId,
    MessageKind, MessageStatus, SessionPhase, UserId,
};
use hushwire_harness::{LoopbackRelay, MockEnv};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);

type Client = ChatClient<MockEnv, MemoryKeyStore, MemoryDirectory>;

fn sign_in(
    relay: &LoopbackRelay,
    directory: MemoryDirectory,
    store: MemoryKeyStore,
    user: UserId,
    seed: u64,
) -> Client {
    let config = ClientConfig {
        socket_base: relay.socket_base(),
        token: user.to_string(),
        channel: ChannelConfig::default(),
    };
    ChatClient::sign_in(MockEnv::new(seed), store, directory, user, config).unwrap()
}

async fn wait_channel_open(notices: &mut mpsc::UnboundedReceiver<ChannelNotice>, peer: UserId) {
    loop {
        let notice = timeout(Duration::from_secs(5), notices.recv())
            .await
            .expect("timed out waiting for a channel notice")
            .expect("channel notice stream ended");
        if notice.scope == (ChannelScope::Conversation { peer })
            && notice.state == ChannelState::Open
        {
            return;
        }
    }
}

/// Re-read the store on every update until `predicate` matches a message.
async fn wait_for_message<F>(
    client: &Client,
    conversation: ConversationId,
    updates: &mut mpsc::UnboundedReceiver<ConversationUpdate>,
    predicate: F,
) -> Message
where
    F: Fn(&Message) -> bool,
{
    for _ in 0..50 {
        let found = client.messages(conversation).await.into_iter().find(|m| predicate(m));
        if let Some(found) = found {
            return found;
        }
        timeout(Duration::from_secs(5), updates.recv())
            .await
            .expect("timed out waiting for a conversation update")
            .expect("conversation update stream ended");
    }
    panic!("message never appeared in {conversation}");
}

struct Fixture {
    relay: LoopbackRelay,
    alice: Client,
    bob: Client,
    alice_updates: mpsc::UnboundedReceiver<ConversationUpdate>,
    bob_updates: mpsc::UnboundedReceiver<ConversationUpdate>,
    conversation: ConversationId,
}

/// Two clients with registered keys and open conversation channels.
async fn connect_pair() -> Fixture {
    let relay = LoopbackRelay::start().await.unwrap();
    let directory = MemoryDirectory::new();
    let alice = sign_in(&relay, directory.clone(), MemoryKeyStore::new(), ALICE, 11);
    let bob = sign_in(&relay, directory.clone(), MemoryKeyStore::new(), BOB, 22);
    directory.insert(ALICE, alice.public_key_hex().await).await;
    directory.insert(BOB, bob.public_key_hex().await).await;

    let mut alice_channels = alice.subscribe_channels().await;
    let mut bob_channels = bob.subscribe_channels().await;
    let alice_updates = alice.subscribe_conversations().await;
    let bob_updates = bob.subscribe_conversations().await;

    alice.open_conversation(BOB).await;
    bob.open_conversation(ALICE).await;
    wait_channel_open(&mut alice_channels, BOB).await;
    wait_channel_open(&mut bob_channels, ALICE).await;

    // Presence tests publish on the global sockets; wait for both.
    for _ in 0..100 {
        if relay.global_count().await == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(relay.global_count().await, 2, "global channels never connected");

    Fixture {
        relay,
        alice,
        bob,
        alice_updates,
        bob_updates,
        conversation: ConversationId::between(ALICE, BOB),
    }
}

#[tokio::test]
async fn encrypted_messages_round_trip_between_clients() {
    let mut fx = connect_pair().await;

    fx.alice.send_message(BOB, "hello over the wire", MessageKind::Text).await.unwrap();

    let received = wait_for_message(&fx.bob, fx.conversation, &mut fx.bob_updates, |m| {
        m.content == "hello over the wire"
    })
    .await;
    assert_eq!(received.sender, ALICE);
    assert_eq!(received.kind, MessageKind::Text);
    assert_eq!(fx.relay.stored_count(ALICE.0, BOB.0).await, 1);

    fx.bob.send_message(ALICE, "clear on this side too", MessageKind::Text).await.unwrap();
    let reply = wait_for_message(&fx.alice, fx.conversation, &mut fx.alice_updates, |m| {
        m.content == "clear on this side too"
    })
    .await;
    assert_eq!(reply.sender, BOB);

    // The relay echo renumbers the local copy and its receipt advances it.
    let sent = wait_for_message(&fx.alice, fx.conversation, &mut fx.alice_updates, |m| {
        m.sender == ALICE && m.status >= MessageStatus::Delivered
    })
    .await;
    assert!(matches!(sent.id, MessageId::Server(_)));
    assert_eq!(fx.alice.session_phase(fx.conversation).await, SessionPhase::Ready);

    fx.alice.shutdown().await;
    fx.bob.shutdown().await;
    fx.relay.stop();
}

#[tokio::test]
async fn seen_receipts_travel_back_to_the_sender() {
    let mut fx = connect_pair().await;
    let mut alice_receipts = fx.alice.subscribe_receipts().await;

    fx.alice.send_message(BOB, "read me", MessageKind::Text).await.unwrap();
    let received =
        wait_for_message(&fx.bob, fx.conversation, &mut fx.bob_updates, |m| m.sender == ALICE)
            .await;
    let MessageId::Server(message_id) = received.id else {
        panic!("relay-stored messages carry server ids");
    };

    fx.bob.mark_seen(fx.conversation, message_id).await.unwrap();

    // The relay's delivered receipt reaches the sender first.
    loop {
        let receipt =
            timeout(Duration::from_secs(5), alice_receipts.recv()).await.unwrap().unwrap();
        assert_eq!(receipt.conversation, fx.conversation);
        if receipt.status == MessageStatus::Seen {
            assert_eq!(receipt.id, MessageId::Server(message_id));
            break;
        }
    }

    let seen = wait_for_message(&fx.alice, fx.conversation, &mut fx.alice_updates, |m| {
        m.status == MessageStatus::Seen
    })
    .await;
    assert_eq!(seen.content, "read me");
}

#[tokio::test]
async fn typing_signals_reach_the_peer() {
    let fx = connect_pair().await;
    let mut bob_typing = fx.bob.subscribe_typing().await;

    fx.alice.set_typing(BOB, true).await.unwrap();
    let update = timeout(Duration::from_secs(5), bob_typing.recv()).await.unwrap().unwrap();
    assert_eq!(update.conversation, fx.conversation);
    assert_eq!(update.typists, vec!["user1".to_string()]);

    fx.alice.set_typing(BOB, false).await.unwrap();
    let update = timeout(Duration::from_secs(5), bob_typing.recv()).await.unwrap().unwrap();
    assert!(update.typists.is_empty());
}

#[tokio::test]
async fn presence_updates_fan_out_on_the_global_channel() {
    let fx = connect_pair().await;
    let mut presence = fx.alice.subscribe_presence().await;

    let frame = json!({
        "type": "last_seen_update",
        "user_id": BOB.0,
        "username": "user2",
        "last_seen": 1_700_000_100_000u64,
    });
    fx.relay.publish_global(&frame).await;

    let update = timeout(Duration::from_secs(5), presence.recv()).await.unwrap().unwrap();
    assert_eq!(update.user, BOB);
    assert_eq!(update.last_seen, 1_700_000_100_000);
    assert_eq!(fx.alice.last_seen(BOB).await, Some(1_700_000_100_000));
}

#[tokio::test]
async fn history_restores_a_conversation_for_a_fresh_sign_in() {
    let relay = LoopbackRelay::start().await.unwrap();
    let directory = MemoryDirectory::new();
    let bob_store = MemoryKeyStore::new();
    let alice = sign_in(&relay, directory.clone(), MemoryKeyStore::new(), ALICE, 31);
    let bob = sign_in(&relay, directory.clone(), bob_store.clone(), BOB, 32);
    directory.insert(ALICE, alice.public_key_hex().await).await;
    directory.insert(BOB, bob.public_key_hex().await).await;

    let mut alice_channels = alice.subscribe_channels().await;
    let mut bob_channels = bob.subscribe_channels().await;
    let mut bob_updates = bob.subscribe_conversations().await;
    alice.open_conversation(BOB).await;
    bob.open_conversation(ALICE).await;
    wait_channel_open(&mut alice_channels, BOB).await;
    wait_channel_open(&mut bob_channels, ALICE).await;

    let conversation = ConversationId::between(ALICE, BOB);
    alice.send_message(BOB, "before the restart", MessageKind::Text).await.unwrap();
    wait_for_message(&bob, conversation, &mut bob_updates, |m| {
        m.content == "before the restart"
    })
    .await;
    bob.shutdown().await;

    // Same account and key store, new client instance: the in-memory view
    // starts empty and comes back entirely from relay history.
    let bob = sign_in(&relay, directory, bob_store, BOB, 33);
    let mut bob_channels = bob.subscribe_channels().await;
    let mut bob_updates = bob.subscribe_conversations().await;
    bob.open_conversation(ALICE).await;
    wait_channel_open(&mut bob_channels, ALICE).await;

    let restored = wait_for_message(&bob, conversation, &mut bob_updates, |m| {
        m.content == "before the restart"
    })
    .await;
    assert!(matches!(restored.id, MessageId::Server(_)));
    assert_eq!(restored.sender, ALICE);
}

#[tokio::test]
async fn missing_peer_key_surfaces_a_handshake_alert() {
    let relay = LoopbackRelay::start().await.unwrap();
    let directory = MemoryDirectory::new();
    let alice = sign_in(&relay, directory, MemoryKeyStore::new(), ALICE, 11);

    let mut alerts = alice.subscribe_handshakes().await;
    let mut channels = alice.subscribe_channels().await;
    alice.open_conversation(BOB).await;
    wait_channel_open(&mut channels, BOB).await;

    alice.send_message(BOB, "into the void", MessageKind::Text).await.unwrap();

    let alert = timeout(Duration::from_secs(5), alerts.recv()).await.unwrap().unwrap();
    assert_eq!(alert.conversation, ConversationId::between(ALICE, BOB));
    assert!(alert.reason.contains("no public key registered"));

    // Any lookup still in flight also fails; the session ends up torn
    // down rather than stuck handshaking.
    for _ in 0..100 {
        if alice.session_phase(alert.conversation).await == SessionPhase::NoSession {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(alice.session_phase(alert.conversation).await, SessionPhase::NoSession);

    alice.shutdown().await;
    relay.stop();
}
