//! Logical-clock sequence tokens.
//!
//! A token is taken when a mutation or read is *issued*, never when it
//! completes, so a request issued first but answered last still compares
//! as older.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A logical timestamp ordering writes to one entity by issue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceToken(u64);

impl SequenceToken {
    /// The token that precedes every issued token.
    pub const ZERO: Self = Self(0);

    /// Creates a token from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns true if this token was issued before `other`.
    #[must_use]
    pub fn is_before(&self, other: &Self) -> bool {
        self < other
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issues strictly increasing [`SequenceToken`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceClock {
    last: u64,
}

impl SequenceClock {
    /// Creates a clock that has issued nothing yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    /// Issues the next token.
    pub fn next(&mut self) -> SequenceToken {
        self.last = self.last.saturating_add(1);
        SequenceToken(self.last)
    }

    /// Returns the most recently issued token, or [`SequenceToken::ZERO`].
    #[must_use]
    pub const fn last(&self) -> SequenceToken {
        SequenceToken(self.last)
    }

    /// Moves the clock past a token issued elsewhere so later tickets
    /// still sort after it.
    pub fn observe(&mut self, token: SequenceToken) {
        self.last = self.last.max(token.0);
    }
}
