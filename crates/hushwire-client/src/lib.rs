//! Tokio driver wiring the sans-IO chat core to websocket relays.
//!
//! [`ChatClient`] is the entry point: sign in with a key store, a peer
//! key directory, and a relay base URL; open conversations; send and
//! receive end-to-end encrypted messages. Frames travel over persistent
//! websockets (one account-wide channel plus one per open conversation)
//! that reconnect with exponential backoff and park after repeated
//! failures until asked to retry.
//!
//! All protocol decisions live in `hushwire-core`; this crate only moves
//! bytes, clocks, and entropy.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod channel;
pub mod client;
pub mod directory;
pub mod env;
pub mod error;
pub mod events;

pub use channel::{
    ChannelClosed, ChannelConfig, ChannelEvent, ChannelHandle, ChannelScope, ChannelState,
    CloseReason, open_channel,
};
pub use client::{ChatClient, ClientConfig};
pub use directory::{DirectoryError, MemoryDirectory, PeerKeyDirectory};
pub use env::SystemEnv;
pub use error::ClientError;
pub use events::{
    ChannelNotice, ClientEvents, ConversationUpdate, EventBus, HandshakeAlert, PresenceUpdate,
    ReceiptUpdate, SubscriptionId, TypingUpdate,
};
pub use hushwire_core::{
    conversation::{ConversationId, UserId},
    coordinator::{SyncAction, SyncEvent, UNDECRYPTABLE_PLACEHOLDER},
    keystore::{KeyStore, MemoryKeyStore},
    session::SessionPhase,
    store::{Message, MessageId, MessageStatus},
};
pub use hushwire_proto::MessageKind;
