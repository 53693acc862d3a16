//! In-process websocket relay speaking the production frame protocol.
//!
//! Accepts the same two endpoint shapes as the real relay: a per-conversation
//! socket at `/ws/chat/{sender}/{receiver}/` and an account-wide socket at
//! `/ws/global/`. Encrypted sends are stored, numbered, echoed to both
//! participants, and acknowledged with a delivery receipt. Frames are built
//! from raw JSON rather than the client's frame types, so a serde bug in the
//! client cannot cancel itself out in tests.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        Message,
        handshake::server::{Request, Response},
    },
};

/// Errors from starting the loopback relay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Listener setup failed
    #[error("relay io: {0}")]
    Io(#[from] std::io::Error),
    /// Websocket handshake failed
    #[error("relay websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// What a connection is for, read from its request path.
#[derive(Debug, Clone, Copy)]
enum Role {
    /// `/ws/chat/{sender}/{receiver}/`, held by `sender`.
    Conversation { sender: u64, receiver: u64 },
    /// `/ws/global/`.
    Global,
}

fn parse_role(path: &str) -> Option<Role> {
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    match parts.as_slice() {
        ["ws", "global"] => Some(Role::Global),
        ["ws", "chat", sender, receiver] => {
            let sender = sender.parse().ok()?;
            let receiver = receiver.parse().ok()?;
            Some(Role::Conversation { sender, receiver })
        }
        _ => None,
    }
}

#[derive(Default)]
struct RelayState {
    /// Outbound queue of each conversation connection, keyed by
    /// (holder, peer).
    conversations: HashMap<(u64, u64), mpsc::UnboundedSender<String>>,
    /// Outbound queues of the account-wide connections.
    globals: Vec<mpsc::UnboundedSender<String>>,
    /// Stored messages per conversation, keyed canonically (lo, hi).
    history: HashMap<(u64, u64), Vec<Value>>,
    next_message_id: u64,
}

/// Handle to a running in-process relay.
pub struct LoopbackRelay {
    addr: SocketAddr,
    state: Arc<Mutex<RelayState>>,
    acceptor: JoinHandle<()>,
}

impl LoopbackRelay {
    /// Bind an ephemeral local port and start accepting connections.
    ///
    /// # Errors
    /// Returns [`RelayError::Io`] when the listener cannot bind.
    pub async fn start() -> Result<Self, RelayError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(RelayState::default()));

        let accept_state = Arc::clone(&state);
        let acceptor = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let state = Arc::clone(&accept_state);
                        tokio::spawn(async move {
                            if let Err(err) = serve_connection(stream, state).await {
                                tracing::debug!("relay connection ended: {err}");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::debug!("relay stopped accepting: {err}");
                        break;
                    }
                }
            }
        });

        Ok(Self { addr, state, acceptor })
    }

    /// `ws://host:port` base for client configuration.
    pub fn socket_base(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Push one frame to every account-wide connection.
    pub async fn publish_global(&self, frame: &Value) {
        let text = frame.to_string();
        let mut state = self.state.lock().await;
        state.globals.retain(|tx| tx.send(text.clone()).is_ok());
    }

    /// Push raw text down the conversation socket `holder` keeps toward
    /// `peer`. Returns `false` when no such connection is up.
    pub async fn send_to(&self, holder: u64, peer: u64, text: &str) -> bool {
        let state = self.state.lock().await;
        state
            .conversations
            .get(&(holder, peer))
            .is_some_and(|tx| tx.send(text.to_string()).is_ok())
    }

    /// Messages stored so far for the conversation between two accounts.
    pub async fn stored_count(&self, a: u64, b: u64) -> usize {
        let key = (a.min(b), a.max(b));
        self.state.lock().await.history.get(&key).map_or(0, Vec::len)
    }

    /// Account-wide connections currently registered.
    pub async fn global_count(&self) -> usize {
        self.state.lock().await.globals.len()
    }

    /// Stop accepting new connections. Existing connections keep running
    /// until their sockets close.
    pub fn stop(&self) {
        self.acceptor.abort();
    }
}

impl Drop for LoopbackRelay {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn serve_connection(
    stream: TcpStream,
    state: Arc<Mutex<RelayState>>,
) -> Result<(), RelayError> {
    let mut path = String::new();
    let websocket = accept_hdr_async(stream, |request: &Request, response: Response| {
        path = request.uri().path().to_string();
        Ok(response)
    })
    .await?;

    let Some(role) = parse_role(&path) else {
        tracing::warn!("relay rejecting unknown path {path:?}");
        return Ok(());
    };

    let (mut sink, mut source) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let registration = tx.clone();
    {
        let mut state = state.lock().await;
        match role {
            Role::Conversation { sender, receiver } => {
                // A reconnect replaces the previous registration.
                state.conversations.insert((sender, receiver), tx);
            }
            Role::Global => state.globals.push(tx),
        }
    }

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Role::Conversation { sender, receiver } = role {
                    handle_conversation_text(sender, receiver, text.as_str(), &state).await;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    // Deregister only if this connection is still the registered one.
    {
        let mut state = state.lock().await;
        match role {
            Role::Conversation { sender, receiver } => {
                let current = state
                    .conversations
                    .get(&(sender, receiver))
                    .is_some_and(|tx| tx.same_channel(&registration));
                if current {
                    state.conversations.remove(&(sender, receiver));
                }
            }
            Role::Global => {
                state.globals.retain(|tx| !tx.same_channel(&registration));
            }
        }
    }
    writer.abort();
    Ok(())
}

async fn handle_conversation_text(
    sender: u64,
    receiver: u64,
    text: &str,
    state: &Arc<Mutex<RelayState>>,
) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        tracing::warn!("relay dropping non-JSON frame from {sender}");
        return;
    };
    let chat_key = (sender.min(receiver), sender.max(receiver));
    let chat_id = format!("{}_{}", chat_key.0, chat_key.1);

    match value.get("type").and_then(Value::as_str) {
        // Untagged frames are encrypted sends.
        None => {
            let mut state = state.lock().await;
            state.next_message_id += 1;
            let id = state.next_message_id;

            let stored = json!({
                "sender": sender,
                "receiver": value.get("receiver").cloned().unwrap_or_else(|| json!(receiver)),
                "message": value.get("message").cloned().unwrap_or_default(),
                "message_type": value.get("message_type").cloned().unwrap_or_else(|| json!("text")),
                "nonce": value.get("nonce").cloned().unwrap_or_default(),
                "ephemeral_key": value.get("ephemeral_key").cloned().unwrap_or_default(),
                "timestamp": value.get("timestamp").cloned().unwrap_or_else(|| json!(0)),
                "id": id,
            });
            state.history.entry(chat_key).or_default().push(stored.clone());

            let mut live = stored;
            live["type"] = json!("message");
            let live_text = live.to_string();
            // Both participants' sockets receive the stored message.
            for key in [(receiver, sender), (sender, receiver)] {
                if let Some(tx) = state.conversations.get(&key) {
                    let _ = tx.send(live_text.clone());
                }
            }

            let receipt = json!({
                "type": "message_delivered",
                "chat_id": chat_id,
                "message_id": id,
            });
            if let Some(tx) = state.conversations.get(&(sender, receiver)) {
                let _ = tx.send(receipt.to_string());
            }
        }
        Some("typing") => {
            let forward = json!({
                "type": "typing",
                "chat_id": chat_id,
                "username": format!("user{sender}"),
                "isTyping": value.get("isTyping").cloned().unwrap_or_else(|| json!(false)),
            });
            let state = state.lock().await;
            if let Some(tx) = state.conversations.get(&(receiver, sender)) {
                let _ = tx.send(forward.to_string());
            }
        }
        Some("message_seen") => {
            let forward = json!({
                "type": "message_seen",
                "chat_id": value.get("chat_id").cloned().unwrap_or_else(|| json!(chat_id)),
                "message_id": value.get("message_id").cloned().unwrap_or_else(|| json!(0)),
            });
            let state = state.lock().await;
            if let Some(tx) = state.conversations.get(&(receiver, sender)) {
                let _ = tx.send(forward.to_string());
            }
        }
        Some("fetch_messages") => {
            let state = state.lock().await;
            let messages = state.history.get(&chat_key).cloned().unwrap_or_default();
            let reply = json!({ "type": "message_history", "messages": messages });
            if let Some(tx) = state.conversations.get(&(sender, receiver)) {
                let _ = tx.send(reply.to_string());
            }
        }
        Some(other) => {
            tracing::warn!("relay ignoring unknown frame type {other:?} from {sender}");
        }
    }
}
