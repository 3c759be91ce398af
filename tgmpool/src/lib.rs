//! # tgmpool - Streaming identity pool for TGMStream
//!
//! Manages the fixed set of streaming identities (one per configured
//! session string). Each identity is usable in at most one active call
//! at a time; sessions acquire an identity when joining a call and
//! release it exactly once on teardown.
//!
//! Exhaustion (`acquire` with no free identity) is an expected
//! condition under load, surfaced as a retryable error rather than by
//! blocking.

mod identity;
mod pool;

pub use identity::{Identity, IdentityId};
pub use pool::IdentityPool;

/// Pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("All streaming identities are in use, try again later")]
    Exhausted,
}

/// Specialized Result type for tgmpool
pub type Result<T> = std::result::Result<T, Error>;
