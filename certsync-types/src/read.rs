//! Read strategy and delivery event types.
//!
//! Every remote read can go through a fast uncertified *query* channel, a
//! slow certified *update* channel, or both. These types describe which
//! channel a request uses and what gets handed to a sink afterwards.

use crate::{Error, Identity};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which channel(s) a read is issued on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Uncertified read only.
    Query,
    /// Certified read only.
    Update,
    /// Both reads, dispatched concurrently.
    QueryAndUpdate,
}

impl FetchStrategy {
    /// Picks the strategy to use for `identity`.
    ///
    /// Without an explicit request, authenticated callers get
    /// [`FetchStrategy::QueryAndUpdate`] and anonymous callers get
    /// [`FetchStrategy::Query`]. An explicit request is returned as is;
    /// validating it against the identity is the caller's job.
    #[must_use]
    pub fn resolve(requested: Option<Self>, identity: &Identity) -> Self {
        match requested {
            Some(strategy) => strategy,
            None if identity.is_anonymous() => Self::Query,
            None => Self::QueryAndUpdate,
        }
    }

    /// Returns true if this strategy issues a certified call.
    #[must_use]
    pub const fn needs_certified(&self) -> bool {
        matches!(self, Self::Update | Self::QueryAndUpdate)
    }

    /// The `certified` flags of the channels this strategy dispatches.
    #[must_use]
    pub fn channels(&self) -> &'static [bool] {
        match self {
            Self::Query => &[false],
            Self::Update => &[true],
            Self::QueryAndUpdate => &[false, true],
        }
    }

    /// The wire name of the strategy.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Update => "update",
            Self::QueryAndUpdate => "query_and_update",
        }
    }
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "query" => Ok(Self::Query),
            "update" => Ok(Self::Update),
            "query_and_update" => Ok(Self::QueryAndUpdate),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

/// One channel dispatch of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    /// Whether this is the certified (update) channel.
    pub certified: bool,
    /// The identity the call is made with.
    pub identity: Identity,
}

impl FetchRequest {
    /// Creates a request for the uncertified channel.
    #[must_use]
    pub const fn query(identity: Identity) -> Self {
        Self {
            certified: false,
            identity,
        }
    }

    /// Creates a request for the certified channel.
    #[must_use]
    pub const fn update(identity: Identity) -> Self {
        Self {
            certified: true,
            identity,
        }
    }
}

/// A successful response handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadEvent<T> {
    pub response: T,
    pub certified: bool,
}

/// A failed channel handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent<E> {
    pub certified: bool,
    pub error: E,
    pub identity: Identity,
}
