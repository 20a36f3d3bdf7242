//! Authenticated user identities.

use std::fmt;

/// Which representation user ids take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    /// 64-bit integer ids, required for worker affinity.
    Numeric,
    /// Opaque string ids.
    Text,
}

/// The user a connection authenticated as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Numeric(i64),
    Text(String),
}

impl Identity {
    /// The numeric user id, if this identity has one.
    #[must_use]
    pub fn numeric(&self) -> Option<i64> {
        match self {
            Identity::Numeric(id) => Some(*id),
            Identity::Text(_) => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> IdentityKind {
        match self {
            Identity::Numeric(_) => IdentityKind::Numeric,
            Identity::Text(_) => IdentityKind::Text,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Numeric(id) => write!(f, "{}", id),
            Identity::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for Identity {
    fn from(id: i64) -> Self {
        Identity::Numeric(id)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Identity::Text(id.to_string())
    }
}
