//! Deterministic test support for the client stack.
//!
//! [`MockEnv`] provides virtual time and seeded randomness for coordinator
//! and channel tests. [`LoopbackRelay`] is an in-process websocket relay
//! speaking the production frame protocol, for end-to-end tests that need
//! two real clients talking through a real socket.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod relay;

pub use env::{MOCK_EPOCH_MILLIS, MockEnv, MockInstant};
pub use relay::{LoopbackRelay, RelayError};
