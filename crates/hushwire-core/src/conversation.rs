//! Account and conversation identifiers.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// Numeric id of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the conversation between two accounts.
///
/// Symmetric: `between(a, b)` and `between(b, a)` name the same
/// conversation. The wire form is `"{lo}_{hi}"` with the numerically
/// smaller account first; parsing accepts either order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId {
    lo: u64,
    hi: u64,
}

impl ConversationId {
    /// Conversation between two accounts, in either order.
    pub fn between(a: UserId, b: UserId) -> Self {
        let (lo, hi) = if a.0 <= b.0 { (a.0, b.0) } else { (b.0, a.0) };
        Self { lo, hi }
    }

    /// The participant that is not `me`.
    ///
    /// For a conversation `me` is not part of, the answer is meaningless;
    /// check [`involves`](Self::involves) first.
    pub fn peer_of(&self, me: UserId) -> UserId {
        if me.0 == self.lo { UserId(self.hi) } else { UserId(self.lo) }
    }

    /// True when `user` is one of the two participants.
    pub fn involves(&self, user: UserId) -> bool {
        user.0 == self.lo || user.0 == self.hi
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.lo, self.hi)
    }
}

/// Error from parsing a conversation id.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid conversation id: {input:?}")]
pub struct ParseConversationIdError {
    /// The rejected input.
    input: String,
}

impl FromStr for ConversationId {
    type Err = ParseConversationIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseConversationIdError { input: s.to_string() };
        let (a, b) = s.split_once('_').ok_or_else(err)?;
        let a: u64 = a.parse().map_err(|_| err())?;
        let b: u64 = b.parse().map_err(|_| err())?;
        Ok(Self::between(UserId(a), UserId(b)))
    }
}
