//! Commands, replies and session state model.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tgmtrack::{ChatId, Platform, Track};

/// Lowest accepted volume level.
pub const MIN_VOLUME: u16 = 1;
/// Highest accepted volume level (Telegram allows boosting to 200%).
pub const MAX_VOLUME: u16 = 200;
/// Volume applied when a session starts.
pub const DEFAULT_VOLUME: u16 = 100;

/// Slowest accepted playback speed.
pub const MIN_SPEED: f64 = 0.5;
/// Fastest accepted playback speed.
pub const MAX_SPEED: f64 = 4.0;
/// Playback speed applied when a session starts.
pub const DEFAULT_SPEED: f64 = 1.0;

/// Playback session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Session exists, no call joined.
    Idle,
    /// Call join (or first resolution) in progress.
    Joining,
    Playing,
    Paused,
    /// Teardown in progress.
    Ending,
    /// Terminal. The identity has been released.
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Joining => "joining",
            SessionState::Playing => "playing",
            SessionState::Paused => "paused",
            SessionState::Ending => "ending",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands a chat member (or a maintenance task) can issue.
#[derive(Debug, Clone)]
pub enum ChatCommand {
    Play {
        /// Query or URL.
        request: String,
        /// Target platform; the configured default when absent.
        platform: Option<Platform>,
        requested_by: String,
    },
    Pause,
    Resume,
    Skip,
    Stop,
    Seek(Duration),
    Volume(u16),
    Speed(f64),
    SetLoop(bool),
    Mute(bool),
    /// Drop every waiting track; current playback is untouched.
    ClearQueue,
    /// Drop one waiting track by position (0 = next up).
    Remove(usize),
    /// Snapshot of the waiting queue.
    Queue,
    /// Snapshot of the session.
    Status,
}

impl ChatCommand {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ChatCommand::Play { .. } => "play",
            ChatCommand::Pause => "pause",
            ChatCommand::Resume => "resume",
            ChatCommand::Skip => "skip",
            ChatCommand::Stop => "stop",
            ChatCommand::Seek(_) => "seek",
            ChatCommand::Volume(_) => "volume",
            ChatCommand::Speed(_) => "speed",
            ChatCommand::SetLoop(_) => "loop",
            ChatCommand::Mute(_) => "mute",
            ChatCommand::ClearQueue => "clear",
            ChatCommand::Remove(_) => "remove",
            ChatCommand::Queue => "queue",
            ChatCommand::Status => "status",
        }
    }

    /// Play-type commands create a session on demand.
    pub fn creates_session(&self) -> bool {
        matches!(self, ChatCommand::Play { .. })
    }
}

/// Successful command outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    /// Track started playing (first track, or after join).
    NowPlaying { title: String },
    /// Track appended behind others (0 = next up).
    Queued { position: usize },
    /// State after an explicit pause/resume (idempotent no-ops
    /// included).
    State(SessionState),
    /// Current track skipped; title of the successor, if any.
    Skipped { next: Option<String> },
    /// Waiting tracks dropped by an explicit clear.
    Cleared { removed: usize },
    /// One waiting track dropped by position.
    Removed { title: String },
    Stopped,
    Seeked,
    VolumeSet(u16),
    SpeedSet(f64),
    LoopSet(bool),
    MuteSet(bool),
    Queue(Vec<Track>),
    Status(SessionSnapshot),
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub chat: ChatId,
    pub state: SessionState,
    pub volume: u16,
    pub speed: f64,
    pub muted: bool,
    pub loop_enabled: bool,
    pub current: Option<Track>,
    pub queued: usize,
}

/// Policy knobs the manager and sessions consult.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Chats below this member count are rejected before any identity
    /// is allocated.
    pub min_member_count: u32,
    /// Platform used when a play command does not name one.
    pub default_platform: Platform,
    /// Priority list tried (once) when a resolution fails.
    pub fallback_platforms: Vec<Platform>,
    /// Waiting tracks per chat (None = unbounded).
    pub max_queue_size: Option<usize>,
    /// Concurrent resolutions across all chats.
    pub resolve_slots: usize,
    /// How long an Idle session survives without commands.
    pub idle_grace: Duration,
    /// Cadence of the idle / empty-call sweeps.
    pub sweep_interval: Duration,
    /// Close calls nobody is listening to.
    pub auto_end_empty_calls: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            min_member_count: 50,
            default_platform: Platform::Youtube,
            fallback_platforms: vec![Platform::Youtube, Platform::JioSaavn],
            max_queue_size: Some(100),
            resolve_slots: 10,
            idle_grace: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            auto_end_empty_calls: true,
        }
    }
}

impl SessionPolicy {
    /// First configured fallback differing from the platform that
    /// already failed, if any.
    pub fn fallback_for(&self, failed: Platform) -> Option<Platform> {
        self.fallback_platforms
            .iter()
            .copied()
            .find(|p| *p != failed)
    }
}
