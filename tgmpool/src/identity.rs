//! Streaming identities (pre-authenticated session strings).

use std::fmt;

/// Stable identifier of a streaming identity within the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId(pub String);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(value: &str) -> Self {
        IdentityId(value.to_string())
    }
}

/// One streaming credential: a logged-in session usable in at most
/// one active call at a time.
///
/// Availability (free / in-use / invalid) is owned by the
/// [`IdentityPool`](crate::IdentityPool), not by the identity value.
#[derive(Clone)]
pub struct Identity {
    id: IdentityId,
    session_string: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, session_string: impl Into<String>) -> Self {
        Self {
            id: IdentityId(id.into()),
            session_string: session_string.into(),
        }
    }

    pub fn id(&self) -> &IdentityId {
        &self.id
    }

    /// The raw session string, handed to the call transport on join.
    pub fn session_string(&self) -> &str {
        &self.session_string
    }
}

// Manual impl: never leak the session string through logs.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity").field("id", &self.id).finish()
    }
}
