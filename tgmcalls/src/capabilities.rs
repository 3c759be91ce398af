//! Capability traits expected from external collaborators.
//!
//! The session core never talks to Telegram or to a media platform
//! directly. It consumes three seams, injected as `Arc<dyn _>` at
//! manager construction: a resolver turning queries into playable
//! sources, a call transport driving the actual voice call, and a
//! chat gateway answering policy questions.

use crate::errors::{GatewayError, ResolveError, TransportError};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tgmpool::Identity;
use tgmtrack::{ChatId, Platform, SourceRef};
use tokio::sync::broadcast;

/// Opaque handle to a joined call, issued by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallHandle(pub u64);

impl fmt::Display for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// Asynchronous notifications emitted by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The current stream played to its end.
    TrackFinished(ChatId),
    /// The voice chat was closed on the Telegram side.
    CallEnded(ChatId),
    /// The streaming identity was removed from the chat.
    Kicked(ChatId),
}

impl TransportEvent {
    pub fn chat(&self) -> ChatId {
        match self {
            TransportEvent::TrackFinished(chat)
            | TransportEvent::CallEnded(chat)
            | TransportEvent::Kicked(chat) => *chat,
        }
    }
}

/// Converts a user query or URL into a concrete playable stream
/// reference.
///
/// Whether a platform is served through cookies, a premium API
/// endpoint or direct scraping is the implementation's business; the
/// core only sees the classified outcome.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(
        &self,
        request: &str,
        platform: Platform,
    ) -> std::result::Result<SourceRef, ResolveError>;
}

/// Voice-call transport: joining/leaving calls and driving the stream.
#[async_trait]
pub trait CallTransport: Send + Sync {
    async fn join(
        &self,
        chat: ChatId,
        identity: &Identity,
    ) -> std::result::Result<CallHandle, TransportError>;

    async fn leave(&self, handle: CallHandle) -> std::result::Result<(), TransportError>;

    async fn play(
        &self,
        handle: CallHandle,
        source: &SourceRef,
    ) -> std::result::Result<(), TransportError>;

    async fn pause(&self, handle: CallHandle) -> std::result::Result<(), TransportError>;

    async fn resume(&self, handle: CallHandle) -> std::result::Result<(), TransportError>;

    async fn set_volume(
        &self,
        handle: CallHandle,
        level: u16,
    ) -> std::result::Result<(), TransportError>;

    async fn set_muted(
        &self,
        handle: CallHandle,
        muted: bool,
    ) -> std::result::Result<(), TransportError>;

    async fn set_speed(
        &self,
        handle: CallHandle,
        factor: f64,
    ) -> std::result::Result<(), TransportError>;

    async fn seek(
        &self,
        handle: CallHandle,
        offset: Duration,
    ) -> std::result::Result<(), TransportError>;

    /// Listeners currently in the call, the streaming identity
    /// included.
    async fn participants(&self, handle: CallHandle) -> std::result::Result<u32, TransportError>;

    /// Whether a stream is still mounted on this call (playing or
    /// paused). Used to resync sessions after missed notifications.
    async fn is_streaming(&self, handle: CallHandle) -> std::result::Result<bool, TransportError>;

    /// Stream of asynchronous transport notifications.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Read-only chat-side policy questions, answered by the external
/// chat client.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn member_count(&self, chat: ChatId) -> std::result::Result<u32, GatewayError>;

    /// Whether the bot may manage video chats in this group.
    async fn can_manage_calls(&self, chat: ChatId) -> std::result::Result<bool, GatewayError>;
}
