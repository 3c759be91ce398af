//! # tgmtrack - Shared data model for TGMStream
//!
//! This crate provides the foundational types shared by the TGMStream
//! crates: chat identifiers, the closed set of supported media
//! platforms, resolved source references and queued tracks.
//!
//! Tracks are immutable once resolved: attaching a resolution yields a
//! new `Track` value, re-resolution after a failure never rewrites an
//! existing one.

mod platform;
mod track;

pub use platform::Platform;
pub use track::{SourceLocation, SourceRef, Track};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram chat identifier (negative for groups/channels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(value: i64) -> Self {
        ChatId(value)
    }
}
