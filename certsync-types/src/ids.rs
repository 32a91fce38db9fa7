//! Caller identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A signed-in principal, serialized as its bare UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(Uuid);

impl PrincipalId {
    /// Mints a principal; v7 so later principals sort after earlier ones.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The identity a remote call is made with.
///
/// An anonymous identity can only issue uncertified queries; certified
/// calls are made on behalf of a real principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "principal", rename_all = "snake_case")]
pub enum Identity {
    /// No signed-in user.
    #[default]
    Anonymous,
    /// A signed-in user.
    Authenticated(PrincipalId),
}

impl Identity {
    /// Creates an identity for the given principal.
    #[must_use]
    pub const fn authenticated(principal: PrincipalId) -> Self {
        Self::Authenticated(principal)
    }

    /// Returns true if this is the anonymous identity.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Returns the principal, if any.
    #[must_use]
    pub const fn principal(&self) -> Option<PrincipalId> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(p) => Some(*p),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Authenticated(p) => write!(f, "{p}"),
        }
    }
}
