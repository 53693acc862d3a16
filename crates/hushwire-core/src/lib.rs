//! Hushwire Synchronization Core
//!
//! Sans-IO state for one signed-in account: identity and peer key
//! lifecycle, per-conversation encryption sessions, the deduplicated
//! message store, and the coordinator state machine that ties them to the
//! wire protocol.
//!
//! # Architecture
//!
//! Events in, actions out. The driver (an async layer owning sockets,
//! clocks, and the key directory) feeds
//! [`SyncEvent`](coordinator::SyncEvent)s to
//! [`SyncCoordinator::handle`](coordinator::SyncCoordinator::handle) and
//! executes the returned [`SyncAction`](coordinator::SyncAction)s. Nothing
//! in this crate performs I/O, reads a clock, or draws randomness on its
//! own; the [`env::Environment`] trait injects all of it.
//!
//! ```text
//! ┌──────────┐  SyncEvent   ┌─────────────────┐  SyncAction  ┌──────────┐
//! │  driver   │─────────────>│ SyncCoordinator │─────────────>│  driver   │
//! │ (sockets) │              │  sessions/store │              │ (sockets) │
//! └──────────┘              └─────────────────┘              └──────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod conversation;
pub mod coordinator;
pub mod env;
pub mod keystore;
pub mod reconnect;
pub mod session;
pub mod store;
