//! Hushwire Wire Protocol
//!
//! JSON frame types exchanged with the relay over persistent connections,
//! plus builders for the endpoint URLs a client dials.
//!
//! Inbound frames carry a `type` tag and parse into a closed enum: a frame
//! with an unknown tag is a parse error, never a silent drop. Outbound
//! frames are tagged the same way, with one deliberate exception — the
//! encrypted message payload is sent untagged because that is what the
//! relay expects.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod endpoint;
mod error;
mod frame;

pub use endpoint::{PublicKeyResponse, conversation_url, global_url, public_key_path};
pub use error::FrameError;
pub use frame::{InboundFrame, MessageKind, MessagePayload, OutboundFrame, SendPayload};
