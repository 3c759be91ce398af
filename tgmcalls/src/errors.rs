//! Error taxonomy for the playback session core.

use crate::model::SessionState;
use crate::{MAX_SPEED, MAX_VOLUME, MIN_SPEED, MIN_VOLUME};
use thiserror::Error;

/// Classified resolution failures reported by a [`MediaResolver`].
///
/// [`MediaResolver`]: crate::MediaResolver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("No results for this query")]
    NotFound,
    #[error("Source rate-limited the request, try again later")]
    RateLimited,
    #[error("Source requires authentication (cookie or session expired)")]
    AuthRequired,
    #[error("Transient resolution failure: {0}")]
    Transient(String),
}

/// Failures reported by the call transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("No active voice chat in this group")]
    NoActiveCall,
    #[error("Identity is not a member of this chat")]
    NotInChat,
    #[error("Telegram server error: {0}")]
    Server(String),
    #[error("Stream error: {0}")]
    Stream(String),
}

/// Failures reported by the chat gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Chat gateway error: {0}")]
pub struct GatewayError(pub String);

/// Errors surfaced by sessions and the session manager.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Permission or member-count policy failure. No resources were
    /// allocated.
    #[error("Rejected by chat policy: {0}")]
    PolicyRejected(String),

    /// No free streaming identity. Retryable.
    #[error(transparent)]
    Exhausted(#[from] tgmpool::Error),

    #[error("Resolution failed: {0}")]
    ResolutionFailed(#[from] ResolveError),

    /// Join or playback failure; the session was forced to Closed and
    /// its identity released.
    #[error("Transport failure: {0}")]
    TransportFailed(#[from] TransportError),

    /// Command not valid in the current session state. The session is
    /// unchanged.
    #[error("Cannot {command} while {state}")]
    InvalidStateTransition {
        state: SessionState,
        command: &'static str,
    },

    #[error("Volume must be between {MIN_VOLUME} and {MAX_VOLUME}, got {0}")]
    InvalidVolume(u16),

    #[error("Speed must be between {MIN_SPEED}x and {MAX_SPEED}x, got {0}x")]
    InvalidSpeed(f64),

    #[error("Seek position is beyond the end of the track")]
    InvalidSeek,

    #[error(transparent)]
    Queue(#[from] tgmqueue::Error),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Command targeted a chat with no active session.
    #[error("Nothing is playing in this chat")]
    NotActive,

    /// The session closed before the command could be answered.
    #[error("Session closed")]
    SessionClosed,
}

/// Specialized Result type for tgmcalls
pub type Result<T> = std::result::Result<T, Error>;
