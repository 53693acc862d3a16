//! Channel lifecycle against a real websocket relay on the loopback
//! interface.

use std::time::Duration;

use hushwire_client::{
    ChannelConfig, ChannelEvent, ChannelHandle, ChannelScope, ChannelState, CloseReason, SystemEnv,
    UserId, open_channel,
};
use hushwire_core::env::Environment;
use hushwire_harness::{LoopbackRelay, MockEnv};
use hushwire_proto::{
    InboundFrame, MessageKind, MessagePayload, OutboundFrame, SendPayload, endpoint,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);

type Events = mpsc::UnboundedReceiver<(ChannelScope, ChannelEvent)>;

async fn next_event(events: &mut Events) -> ChannelEvent {
    match timeout(Duration::from_secs(5), events.recv()).await {
        Ok(Some((_, event))) => event,
        Ok(None) => panic!("event stream ended"),
        Err(_) => panic!("timed out waiting for a channel event"),
    }
}

async fn next_state(events: &mut Events) -> ChannelState {
    loop {
        if let ChannelEvent::State(state) = next_event(events).await {
            return state;
        }
    }
}

async fn next_frame(events: &mut Events) -> InboundFrame {
    loop {
        if let ChannelEvent::Frame(frame) = next_event(events).await {
            return frame;
        }
    }
}

/// Next relayed message, skipping the history snapshot a conversation
/// channel pulls on connect.
async fn next_message(events: &mut Events) -> MessagePayload {
    loop {
        match next_frame(events).await {
            InboundFrame::Message(payload) => return payload,
            InboundFrame::MessageHistory { .. } => {}
            other => panic!("expected a message frame, got {other:?}"),
        }
    }
}

async fn wait_for_state(events: &mut Events, want: ChannelState) {
    loop {
        if next_state(events).await == want {
            return;
        }
    }
}

fn conversation_channel<E: Environment>(
    env: E,
    relay: &LoopbackRelay,
    local: UserId,
    peer: UserId,
) -> (ChannelHandle, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    let url = endpoint::conversation_url(&relay.socket_base(), local.0, peer.0, "token");
    let handle = open_channel(
        env,
        ChannelScope::Conversation { peer },
        url,
        ChannelConfig::default(),
        tx,
    );
    (handle, rx)
}

#[tokio::test]
async fn conversation_channel_opens_and_pulls_history() {
    let relay = LoopbackRelay::start().await.unwrap();
    let (handle, mut events) = conversation_channel(MockEnv::new(1), &relay, ALICE, BOB);

    assert_eq!(next_state(&mut events).await, ChannelState::Connecting);
    assert_eq!(next_state(&mut events).await, ChannelState::Open);
    // The channel requests stored history on every connect.
    assert_eq!(next_frame(&mut events).await, InboundFrame::MessageHistory { messages: vec![] });

    handle.close().await;
    wait_for_state(&mut events, ChannelState::Closed(CloseReason::Requested)).await;
    relay.stop();
}

#[tokio::test]
async fn frames_flow_between_two_conversation_channels() {
    let relay = LoopbackRelay::start().await.unwrap();
    let (alice, mut alice_events) = conversation_channel(MockEnv::new(1), &relay, ALICE, BOB);
    let (bob, mut bob_events) = conversation_channel(MockEnv::new(2), &relay, BOB, ALICE);

    wait_for_state(&mut alice_events, ChannelState::Open).await;
    wait_for_state(&mut bob_events, ChannelState::Open).await;

    let outbound = OutboundFrame::Send(SendPayload {
        message: "636970686572".to_string(),
        nonce: "00112233445566778899aabbccddeeff".to_string(),
        ephemeral_key: "ab".repeat(32),
        message_type: MessageKind::Text,
        receiver: BOB.0,
        timestamp: 5,
    });
    alice.send(&outbound).await.unwrap();

    // The relay numbers the message and fans it out to both sides.
    let payload = next_message(&mut bob_events).await;
    assert_eq!(payload.sender, ALICE.0);
    assert_eq!(payload.receiver, BOB.0);
    assert_eq!(payload.message, "636970686572");
    assert_eq!(payload.id, Some(1));

    let echo = next_message(&mut alice_events).await;
    assert_eq!(echo.id, Some(1));
    let receipt = next_frame(&mut alice_events).await;
    assert_eq!(receipt, InboundFrame::MessageDelivered { chat_id: "1_2".to_string(), message_id: 1 });

    assert_eq!(relay.stored_count(ALICE.0, BOB.0).await, 1);

    alice.close().await;
    bob.close().await;
    relay.stop();
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_closing() {
    let relay = LoopbackRelay::start().await.unwrap();
    let (handle, mut events) = conversation_channel(MockEnv::new(1), &relay, ALICE, BOB);

    wait_for_state(&mut events, ChannelState::Open).await;
    let _ = next_frame(&mut events).await; // history

    assert!(relay.send_to(ALICE.0, BOB.0, "not json at all").await);
    assert!(relay.send_to(ALICE.0, BOB.0, r#"{"type":"from_the_future"}"#).await);
    let typing = r#"{"type":"typing","chat_id":"1_2","username":"bob","isTyping":true}"#;
    assert!(relay.send_to(ALICE.0, BOB.0, typing).await);

    // Only the well-formed frame surfaces; the channel never dropped.
    assert_eq!(
        next_frame(&mut events).await,
        InboundFrame::Typing {
            chat_id: "1_2".to_string(),
            username: "bob".to_string(),
            is_typing: true,
        }
    );

    handle.close().await;
    relay.stop();
}

#[tokio::test]
async fn reconnect_exhaustion_parks_the_channel_until_retry() {
    // Grab a free port and release it so every dial is refused.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let (tx, mut events) = mpsc::unbounded_channel();
    let handle = open_channel(
        MockEnv::new(1),
        ChannelScope::Global,
        endpoint::global_url(&base, "token"),
        ChannelConfig::default(),
        tx,
    );

    let mut saw_disconnected = false;
    loop {
        match next_state(&mut events).await {
            ChannelState::Disconnected => saw_disconnected = true,
            ChannelState::Closed(reason) => {
                assert_eq!(reason, CloseReason::ReconnectExhausted { attempts: 5 });
                break;
            }
            ChannelState::Connecting | ChannelState::Open => {}
        }
    }
    assert!(saw_disconnected, "backoff never surfaced a disconnected state");

    // A parked channel dials again only when asked to.
    handle.retry().await.unwrap();
    assert_eq!(next_state(&mut events).await, ChannelState::Connecting);
    wait_for_state(
        &mut events,
        ChannelState::Closed(CloseReason::ReconnectExhausted { attempts: 5 }),
    )
    .await;
    handle.close().await;
}

#[tokio::test]
async fn close_during_backoff_reports_a_requested_close() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    // Real clock: the close lands inside the first backoff window.
    let (tx, mut events) = mpsc::unbounded_channel();
    let handle = open_channel(
        SystemEnv::default(),
        ChannelScope::Global,
        endpoint::global_url(&base, "token"),
        ChannelConfig { base_delay: Duration::from_secs(30) },
        tx,
    );

    wait_for_state(&mut events, ChannelState::Disconnected).await;
    handle.close().await;
    wait_for_state(&mut events, ChannelState::Closed(CloseReason::Requested)).await;
}
