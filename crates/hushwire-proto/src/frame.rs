//! JSON frames exchanged over the persistent connections.
//!
//! The relay tags every frame with a `type` field. [`InboundFrame`] is the
//! closed set a client accepts; anything else fails to parse and is handled
//! by the caller as a malformed frame. [`OutboundFrame`] covers everything
//! a client sends.

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Content kind carried inside an encrypted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Reference to an uploaded image.
    Image,
    /// Reference to an uploaded file.
    File,
}

/// Payload of a relayed encrypted message.
///
/// The same shape appears in live `message` frames and in `message_history`
/// entries; only history entries are guaranteed to carry the server id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Numeric id of the sending account.
    pub sender: u64,
    /// Numeric id of the receiving account.
    pub receiver: u64,
    /// Hex-encoded AES-256-CBC ciphertext.
    pub message: String,
    /// Kind of content inside the ciphertext.
    pub message_type: MessageKind,
    /// Hex-encoded 16-byte CBC initialization vector.
    pub nonce: String,
    /// Hex-encoded X25519 ephemeral public key used for key derivation.
    pub ephemeral_key: String,
    /// Sender-side Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// Server-assigned message id, when the relay provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

/// One JSON frame received from the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Encrypted chat message relayed from a peer.
    Message(MessagePayload),

    /// The relay stored a message and assigned it an id.
    MessageDelivered {
        /// Conversation id in `{lo}_{hi}` form.
        chat_id: String,
        /// Server-assigned id of the delivered message.
        message_id: u64,
    },

    /// The peer's client displayed a message.
    MessageSeen {
        /// Conversation id in `{lo}_{hi}` form.
        chat_id: String,
        /// Server-assigned id of the seen message.
        message_id: u64,
    },

    /// A participant started or stopped composing.
    Typing {
        /// Conversation id in `{lo}_{hi}` form.
        chat_id: String,
        /// Display name of the typist.
        username: String,
        /// True while composing.
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },

    /// An account's last-seen timestamp changed.
    LastSeenUpdate {
        /// Numeric id of the account, when the relay includes it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<u64>,
        /// Display name of the account, when the relay includes it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        /// Unix timestamp in milliseconds of the sighting.
        last_seen: u64,
    },

    /// Stored history for the conversation, oldest first.
    MessageHistory {
        /// Every stored message, both directions.
        messages: Vec<MessagePayload>,
    },
}

impl InboundFrame {
    /// Parse one frame from raw JSON text.
    ///
    /// # Errors
    /// Returns [`FrameError::Malformed`] for invalid JSON, an unknown
    /// `type` tag, or a known tag with missing or mistyped fields.
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        serde_json::from_str(raw).map_err(|e| FrameError::Malformed {
            reason: e.to_string(),
        })
    }
}

/// Body of an outbound encrypted message.
///
/// Sent untagged; the relay infers the sender from the connection and fills
/// it in when relaying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPayload {
    /// Hex-encoded AES-256-CBC ciphertext.
    pub message: String,
    /// Hex-encoded 16-byte CBC initialization vector.
    pub nonce: String,
    /// Hex-encoded X25519 ephemeral public key used for key derivation.
    pub ephemeral_key: String,
    /// Kind of content inside the ciphertext.
    pub message_type: MessageKind,
    /// Numeric id of the receiving account.
    pub receiver: u64,
    /// Sender-side Unix timestamp in milliseconds.
    pub timestamp: u64,
}

/// One JSON frame sent to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Encrypted chat message. The only untagged frame on the wire.
    Send(SendPayload),

    /// The local user started or stopped composing.
    Typing {
        /// Numeric id of the peer being typed at.
        receiver: u64,
        /// True while composing.
        is_typing: bool,
    },

    /// The local user displayed a message.
    MessageSeen {
        /// Conversation id in `{lo}_{hi}` form.
        chat_id: String,
        /// Server-assigned id of the seen message.
        message_id: u64,
    },

    /// Ask the relay for the conversation's stored history.
    FetchMessages,
}

impl OutboundFrame {
    /// Serialize to the JSON text sent over the socket.
    pub fn encode(&self) -> String {
        let value = match self {
            Self::Send(payload) => serde_json::json!(payload),
            Self::Typing { receiver, is_typing } => serde_json::json!({
                "type": "typing",
                "receiver": receiver,
                "isTyping": is_typing,
            }),
            Self::MessageSeen { chat_id, message_id } => serde_json::json!({
                "type": "message_seen",
                "chat_id": chat_id,
                "message_id": message_id,
            }),
            Self::FetchMessages => serde_json::json!({ "type": "fetch_messages" }),
        };
        value.to_string()
    }
}
