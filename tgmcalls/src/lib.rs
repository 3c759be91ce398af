//! # tgmcalls - Voice-call playback sessions
//!
//! Core of the TGMStream bot: per-chat playback sessions over Telegram
//! group voice calls. A [`SessionManager`] routes user commands to one
//! actor per chat; each actor drives a strict state machine
//! (Idle, Joining, Playing, Paused, Ending, Closed), owns the chat's
//! track queue, and borrows a streaming identity from the shared
//! [`tgmpool::IdentityPool`] for the lifetime of the call.
//!
//! The crate talks to the outside world through three injected
//! capabilities: [`MediaResolver`], [`CallTransport`] and
//! [`ChatGateway`]. It contains no Telegram client of its own.
//!
//! ## Guarantees
//!
//! - Commands for one chat are applied strictly in arrival order;
//!   different chats never block each other.
//! - A session holds at most one identity, released exactly once when
//!   the session closes.
//! - A skip or stop issued while a track is still being resolved wins:
//!   the late resolution result is discarded.

mod capabilities;
#[cfg(feature = "tgmconfig")]
mod config_ext;
mod errors;
mod manager;
mod model;
mod session;

pub use capabilities::{CallHandle, CallTransport, ChatGateway, MediaResolver, TransportEvent};
pub use errors::{Error, GatewayError, ResolveError, Result, TransportError};
pub use manager::SessionManager;
pub use model::{
    ChatCommand, CommandReply, SessionPolicy, SessionSnapshot, SessionState, DEFAULT_SPEED,
    DEFAULT_VOLUME, MAX_SPEED, MAX_VOLUME, MIN_SPEED, MIN_VOLUME,
};
