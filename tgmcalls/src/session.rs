//! Per-chat playback session: one actor task, one state machine.
//!
//! Every session owns its queue, its streaming identity and the call
//! handle. Commands and transport events arrive over a single channel,
//! so state transitions for one chat never interleave; chats proceed
//! independently.
//!
//! Resolution and call-join are the two suspension points. Both run in
//! spawned sub-tasks guarded by a cancellation token and a generation
//! counter: a stop or skip invalidates the generation, and the stale
//! completion is discarded when (or before) it arrives.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tgmpool::IdentityPool;
use tgmqueue::ChatQueue;
use tgmtrack::{ChatId, Platform, SourceRef, Track};

use crate::capabilities::{CallHandle, CallTransport, MediaResolver};
use crate::errors::{Error, ResolveError, Result, TransportError};
use crate::model::{
    ChatCommand, CommandReply, SessionPolicy, SessionSnapshot, SessionState, DEFAULT_SPEED,
    DEFAULT_VOLUME, MAX_SPEED, MAX_VOLUME, MIN_SPEED, MIN_VOLUME,
};

/// Messages a session actor consumes.
pub(crate) enum SessionMsg {
    Command {
        cmd: ChatCommand,
        reply: oneshot::Sender<Result<CommandReply>>,
    },
    Event(SessionEvent),
}

/// Internal events: transport notifications, sweep ticks, and
/// completions of the session's own sub-tasks.
pub(crate) enum SessionEvent {
    Resolved {
        seq: u64,
        result: std::result::Result<SourceRef, ResolveError>,
    },
    Joined {
        seq: u64,
        result: std::result::Result<CallHandle, TransportError>,
    },
    TrackFinished,
    CallEnded,
    /// Periodic maintenance tick: idle expiry, empty-call detection,
    /// and playback resync after missed transport notifications.
    Sweep,
}

/// Registry-side handle to a session actor.
pub(crate) struct SessionHandle {
    pub(crate) tx: mpsc::UnboundedSender<SessionMsg>,
    pub(crate) epoch: u64,
}

impl SessionHandle {
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the actor task for a chat and return its handle.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn(
    chat: ChatId,
    epoch: u64,
    pool: Arc<IdentityPool>,
    resolver: Arc<dyn MediaResolver>,
    transport: Arc<dyn CallTransport>,
    policy: Arc<SessionPolicy>,
    resolve_slots: Arc<Semaphore>,
    closed_tx: mpsc::UnboundedSender<(ChatId, u64)>,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session {
        chat,
        epoch,
        state: SessionState::Idle,
        queue: ChatQueue::with_capacity(policy.max_queue_size),
        identity: None,
        handle: None,
        volume: DEFAULT_VOLUME,
        speed: DEFAULT_SPEED,
        muted: false,
        last_activity: Instant::now(),
        seq: 0,
        cancel: None,
        pending_play: None,
        pool,
        resolver,
        transport,
        policy,
        resolve_slots,
        tx_self: tx.clone(),
        closed_tx,
    };
    tokio::spawn(session.run(rx));
    SessionHandle { tx, epoch }
}

struct Session {
    chat: ChatId,
    epoch: u64,
    state: SessionState,
    queue: ChatQueue,
    identity: Option<tgmpool::Identity>,
    handle: Option<CallHandle>,
    volume: u16,
    speed: f64,
    muted: bool,
    last_activity: Instant,
    /// Generation counter for resolution/join sub-tasks.
    seq: u64,
    cancel: Option<CancellationToken>,
    /// Deferred reply for a play command whose track is still being
    /// resolved or joined.
    pending_play: Option<oneshot::Sender<Result<CommandReply>>>,
    pool: Arc<IdentityPool>,
    resolver: Arc<dyn MediaResolver>,
    transport: Arc<dyn CallTransport>,
    policy: Arc<SessionPolicy>,
    resolve_slots: Arc<Semaphore>,
    tx_self: mpsc::UnboundedSender<SessionMsg>,
    closed_tx: mpsc::UnboundedSender<(ChatId, u64)>,
}

impl Session {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionMsg>) {
        info!("Session created for chat {}", self.chat);
        while let Some(msg) = rx.recv().await {
            match msg {
                SessionMsg::Command { cmd, reply } => self.handle_command(cmd, reply).await,
                SessionMsg::Event(event) => self.handle_event(event).await,
            }
            if self.state == SessionState::Closed {
                break;
            }
        }
        debug!("Session actor for chat {} stopped", self.chat);
    }

    async fn handle_command(
        &mut self,
        cmd: ChatCommand,
        reply: oneshot::Sender<Result<CommandReply>>,
    ) {
        self.last_activity = Instant::now();
        debug!("Chat {}: handling {}", self.chat, cmd.name());

        let outcome = match cmd {
            ChatCommand::Play {
                request,
                platform,
                requested_by,
            } => {
                // Reply may be deferred until resolution completes.
                self.on_play(request, platform, requested_by, reply).await;
                return;
            }
            ChatCommand::Pause => self.on_pause().await,
            ChatCommand::Resume => self.on_resume().await,
            ChatCommand::Skip => self.on_skip().await,
            ChatCommand::Stop => {
                self.close("stopped on request").await;
                Ok(CommandReply::Stopped)
            }
            ChatCommand::Seek(offset) => self.on_seek(offset).await,
            ChatCommand::Volume(level) => self.on_volume(level).await,
            ChatCommand::Speed(factor) => self.on_speed(factor).await,
            ChatCommand::SetLoop(enabled) => {
                self.queue.set_loop(enabled);
                Ok(CommandReply::LoopSet(enabled))
            }
            ChatCommand::Mute(muted) => self.on_mute(muted).await,
            ChatCommand::ClearQueue => self.on_clear(),
            ChatCommand::Remove(index) => self.on_remove(index),
            ChatCommand::Queue => Ok(CommandReply::Queue(self.queue.snapshot())),
            ChatCommand::Status => Ok(CommandReply::Status(self.snapshot())),
        };
        let _ = reply.send(outcome);
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Resolved { seq, result } => self.on_resolved(seq, result).await,
            SessionEvent::Joined { seq, result } => self.on_joined(seq, result).await,
            SessionEvent::TrackFinished => self.on_track_finished().await,
            SessionEvent::CallEnded => self.close("call ended externally").await,
            SessionEvent::Sweep => self.on_sweep().await,
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn on_play(
        &mut self,
        request: String,
        platform: Option<Platform>,
        requested_by: String,
        reply: oneshot::Sender<Result<CommandReply>>,
    ) {
        let platform = platform.unwrap_or(self.policy.default_platform);
        let track = Track::new(platform, request, requested_by);

        match self.state {
            SessionState::Idle => {
                // Acquire the identity first: exhaustion must not
                // leave a track queued.
                let identity = match self.pool.acquire_for(self.chat) {
                    Ok(identity) => identity,
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                        return;
                    }
                };
                if let Err(e) = self.queue.enqueue(track) {
                    self.pool.release(identity);
                    let _ = reply.send(Err(e.into()));
                    return;
                }
                self.identity = Some(identity);
                self.state = SessionState::Joining;
                self.pending_play = Some(reply);
                // Promote the queue head (FIFO: an earlier queued
                // track may still be ahead of this one).
                if self.queue.advance().is_ok() {
                    self.play_current().await;
                }
            }
            SessionState::Joining | SessionState::Playing | SessionState::Paused => {
                let outcome = self
                    .queue
                    .enqueue(track)
                    .map(|position| CommandReply::Queued { position })
                    .map_err(Error::from);
                let _ = reply.send(outcome);
            }
            SessionState::Ending | SessionState::Closed => {
                let _ = reply.send(Err(Error::SessionClosed));
            }
        }
    }

    async fn on_pause(&mut self) -> Result<CommandReply> {
        match self.state {
            SessionState::Playing => {
                let handle = self.call_handle()?;
                let result = self.transport.pause(handle).await;
                self.transport_op(result, "pause").await?;
                self.state = SessionState::Paused;
                Ok(CommandReply::State(SessionState::Paused))
            }
            // Idempotent: already paused.
            SessionState::Paused => Ok(CommandReply::State(SessionState::Paused)),
            state => Err(Error::InvalidStateTransition {
                state,
                command: "pause",
            }),
        }
    }

    async fn on_resume(&mut self) -> Result<CommandReply> {
        match self.state {
            SessionState::Paused => {
                let handle = self.call_handle()?;
                let result = self.transport.resume(handle).await;
                self.transport_op(result, "resume").await?;
                self.state = SessionState::Playing;
                Ok(CommandReply::State(SessionState::Playing))
            }
            // Idempotent: already playing.
            SessionState::Playing => Ok(CommandReply::State(SessionState::Playing)),
            state => Err(Error::InvalidStateTransition {
                state,
                command: "resume",
            }),
        }
    }

    async fn on_skip(&mut self) -> Result<CommandReply> {
        match self.state {
            SessionState::Joining | SessionState::Playing | SessionState::Paused => {
                // Discard any in-flight resolution/join result for the
                // current track; the identity stays with the session.
                self.cancel_inflight();
                match self.queue.advance().map(|t| t.title().to_string()) {
                    Ok(next) => {
                        self.play_current().await;
                        Ok(CommandReply::Skipped { next: Some(next) })
                    }
                    Err(_) => {
                        self.close("skipped the last track").await;
                        Ok(CommandReply::Skipped { next: None })
                    }
                }
            }
            state => Err(Error::InvalidStateTransition {
                state,
                command: "skip",
            }),
        }
    }

    async fn on_seek(&mut self, offset: std::time::Duration) -> Result<CommandReply> {
        match self.state {
            SessionState::Playing | SessionState::Paused => {
                if let Some(duration) = self.queue.current().and_then(|t| t.duration()) {
                    if offset >= duration {
                        return Err(Error::InvalidSeek);
                    }
                }
                let handle = self.call_handle()?;
                let result = self.transport.seek(handle, offset).await;
                self.transport_op(result, "seek").await?;
                Ok(CommandReply::Seeked)
            }
            state => Err(Error::InvalidStateTransition {
                state,
                command: "seek",
            }),
        }
    }

    async fn on_volume(&mut self, level: u16) -> Result<CommandReply> {
        match self.state {
            SessionState::Playing | SessionState::Paused => {
                if !(MIN_VOLUME..=MAX_VOLUME).contains(&level) {
                    return Err(Error::InvalidVolume(level));
                }
                let handle = self.call_handle()?;
                let result = self.transport.set_volume(handle, level).await;
                self.transport_op(result, "volume").await?;
                self.volume = level;
                Ok(CommandReply::VolumeSet(level))
            }
            state => Err(Error::InvalidStateTransition {
                state,
                command: "volume",
            }),
        }
    }

    async fn on_speed(&mut self, factor: f64) -> Result<CommandReply> {
        match self.state {
            SessionState::Playing | SessionState::Paused => {
                if !(MIN_SPEED..=MAX_SPEED).contains(&factor) {
                    return Err(Error::InvalidSpeed(factor));
                }
                let handle = self.call_handle()?;
                let result = self.transport.set_speed(handle, factor).await;
                self.transport_op(result, "speed").await?;
                self.speed = factor;
                Ok(CommandReply::SpeedSet(factor))
            }
            state => Err(Error::InvalidStateTransition {
                state,
                command: "speed",
            }),
        }
    }

    fn on_clear(&mut self) -> Result<CommandReply> {
        match self.state {
            SessionState::Joining | SessionState::Playing | SessionState::Paused => {
                let removed = self.queue.clear();
                info!("Chat {}: cleared {} waiting track(s)", self.chat, removed);
                Ok(CommandReply::Cleared { removed })
            }
            state => Err(Error::InvalidStateTransition {
                state,
                command: "clear",
            }),
        }
    }

    fn on_remove(&mut self, index: usize) -> Result<CommandReply> {
        match self.state {
            SessionState::Joining | SessionState::Playing | SessionState::Paused => {
                let track = self.queue.remove_at(index)?;
                Ok(CommandReply::Removed {
                    title: track.title().to_string(),
                })
            }
            state => Err(Error::InvalidStateTransition {
                state,
                command: "remove",
            }),
        }
    }

    async fn on_mute(&mut self, muted: bool) -> Result<CommandReply> {
        match self.state {
            SessionState::Playing | SessionState::Paused => {
                let handle = self.call_handle()?;
                let result = self.transport.set_muted(handle, muted).await;
                self.transport_op(result, "mute").await?;
                self.muted = muted;
                Ok(CommandReply::MuteSet(muted))
            }
            state => Err(Error::InvalidStateTransition {
                state,
                command: "mute",
            }),
        }
    }

    // ------------------------------------------------------------------
    // Internal events
    // ------------------------------------------------------------------

    async fn on_resolved(
        &mut self,
        seq: u64,
        result: std::result::Result<SourceRef, ResolveError>,
    ) {
        if seq != self.seq {
            debug!("Chat {}: discarding stale resolution (seq {})", self.chat, seq);
            return;
        }
        self.cancel = None;

        match result {
            Ok(source) => {
                if self.queue.resolve_current(source).is_err() {
                    return;
                }
                match self.handle {
                    Some(handle) => self.start_stream(handle).await,
                    None => self.start_join(),
                }
            }
            Err(error) => self.on_resolution_failed(error).await,
        }
    }

    async fn on_resolution_failed(&mut self, error: ResolveError) {
        warn!("Chat {}: resolution failed: {}", self.chat, error);
        // The failed track is dropped either way.
        self.queue.take_current();

        if self.handle.is_none() {
            // First track never made it into a call: surface the error
            // and fall back to Idle with the identity returned.
            if let Some(identity) = self.identity.take() {
                self.pool.release(identity);
            }
            self.state = SessionState::Idle;
            if let Some(reply) = self.pending_play.take() {
                let _ = reply.send(Err(error.into()));
            }
            return;
        }

        // Mid-call: move on to the next queued track, close when none
        // remains.
        if self.queue.advance().is_ok() {
            self.play_current().await;
        } else {
            self.close("queue finished after a failed resolution").await;
        }
    }

    async fn on_joined(
        &mut self,
        seq: u64,
        result: std::result::Result<CallHandle, TransportError>,
    ) {
        if seq != self.seq {
            debug!("Chat {}: discarding stale join (seq {})", self.chat, seq);
            return;
        }
        self.cancel = None;

        match result {
            Ok(handle) => {
                info!("Chat {}: joined voice call ({})", self.chat, handle);
                self.handle = Some(handle);
                self.start_stream(handle).await;
            }
            Err(error) => {
                warn!("Chat {}: call join failed: {}", self.chat, error);
                if let Some(reply) = self.pending_play.take() {
                    let _ = reply.send(Err(error.into()));
                }
                self.close("join failed").await;
            }
        }
    }

    async fn on_track_finished(&mut self) {
        if self.state != SessionState::Playing {
            debug!(
                "Chat {}: ignoring track-finished while {}",
                self.chat, self.state
            );
            return;
        }
        if self.queue.advance().is_ok() {
            self.play_current().await;
        } else {
            info!("Chat {}: queue finished", self.chat);
            self.close("queue finished").await;
        }
    }

    async fn on_sweep(&mut self) {
        match self.state {
            SessionState::Idle => {
                if self.last_activity.elapsed() >= self.policy.idle_grace {
                    self.close("idle past grace period").await;
                }
            }
            SessionState::Playing | SessionState::Paused => {
                let Some(handle) = self.handle else { return };
                // A track-finished notification can be lost (lagged
                // event stream); a Playing session with no mounted
                // stream is behind and must advance.
                if self.state == SessionState::Playing {
                    match self.transport.is_streaming(handle).await {
                        Ok(false) => {
                            warn!(
                                "Chat {}: stream ended without notification, resyncing",
                                self.chat
                            );
                            self.on_track_finished().await;
                            return;
                        }
                        Ok(true) => {}
                        Err(e) => {
                            debug!("Chat {}: stream check failed: {}", self.chat, e);
                            return;
                        }
                    }
                }
                if self.policy.auto_end_empty_calls {
                    match self.transport.participants(handle).await {
                        // Only the streaming identity left in the call.
                        Ok(listeners) if listeners <= 1 => {
                            info!("Chat {}: no listeners, leaving the call", self.chat);
                            self.close("no listeners in call").await;
                        }
                        Ok(_) => {}
                        Err(e) => debug!("Chat {}: participant check failed: {}", self.chat, e),
                    }
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Playback plumbing
    // ------------------------------------------------------------------

    /// Start (or continue) playback of the current queue track:
    /// resolve it if needed, then join/stream.
    async fn play_current(&mut self) {
        let Some(current) = self.queue.current() else {
            return;
        };
        if current.is_resolved() {
            // Loop-cycled tracks come back with their resolution.
            match self.handle {
                Some(handle) => self.start_stream(handle).await,
                None => self.start_join(),
            }
        } else {
            self.start_resolution();
        }
    }

    /// Resolve the current track in a cancellable sub-task.
    fn start_resolution(&mut self) {
        let Some(current) = self.queue.current() else {
            return;
        };
        let request = current.request.clone();
        let platform = current.platform;
        let fallback = self.policy.fallback_for(platform);

        let seq = self.bump_seq();
        let token = CancellationToken::new();
        self.cancel = Some(token.clone());

        let resolver = Arc::clone(&self.resolver);
        let slots = Arc::clone(&self.resolve_slots);
        let tx = self.tx_self.clone();
        let chat = self.chat;
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => {
                    debug!("Chat {}: resolution cancelled", chat);
                    return;
                }
                result = resolve_with_fallback(resolver, slots, request, platform, fallback) => result,
            };
            let _ = tx.send(SessionMsg::Event(SessionEvent::Resolved { seq, result }));
        });
    }

    /// Join the call in a cancellable sub-task.
    fn start_join(&mut self) {
        let Some(identity) = self.identity.clone() else {
            return;
        };
        let seq = self.bump_seq();
        let token = CancellationToken::new();
        self.cancel = Some(token.clone());

        let transport = Arc::clone(&self.transport);
        let tx = self.tx_self.clone();
        let chat = self.chat;
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => {
                    debug!("Chat {}: join cancelled", chat);
                    return;
                }
                result = transport.join(chat, &identity) => result,
            };
            let _ = tx.send(SessionMsg::Event(SessionEvent::Joined { seq, result }));
        });
    }

    /// Hand the resolved current track to the transport.
    async fn start_stream(&mut self, handle: CallHandle) {
        let Some(source) = self.queue.current().and_then(|t| t.resolved()).cloned() else {
            return;
        };
        match self.transport.play(handle, &source).await {
            Ok(()) => {
                self.state = SessionState::Playing;
                self.last_activity = Instant::now();
                info!("Chat {}: now playing {}", self.chat, source.title);
                if let Some(reply) = self.pending_play.take() {
                    let _ = reply.send(Ok(CommandReply::NowPlaying {
                        title: source.title.clone(),
                    }));
                }
            }
            Err(error) => {
                // Transport failures are terminal, no retry.
                warn!("Chat {}: playback failed: {}", self.chat, error);
                if let Some(reply) = self.pending_play.take() {
                    let _ = reply.send(Err(error.into()));
                }
                self.close("playback failed").await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers / teardown
    // ------------------------------------------------------------------

    fn call_handle(&self) -> Result<CallHandle> {
        self.handle
            .ok_or(Error::TransportFailed(TransportError::NoActiveCall))
    }

    /// Run a transport control command; a failure terminates the
    /// session.
    async fn transport_op(
        &mut self,
        result: std::result::Result<(), TransportError>,
        op: &str,
    ) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                warn!("Chat {}: {} failed: {}", self.chat, op, error);
                self.close("transport failure").await;
                Err(error.into())
            }
        }
    }

    fn bump_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Invalidate and cancel any in-flight resolution or join.
    fn cancel_inflight(&mut self) {
        self.bump_seq();
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }

    /// Terminal transition. Idempotent: the identity is released
    /// exactly once even when an external call-end races a user stop.
    async fn close(&mut self, reason: &str) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Ending;
        self.cancel_inflight();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.transport.leave(handle).await {
                debug!("Chat {}: leave failed during teardown: {}", self.chat, e);
            }
        }
        self.queue.purge();
        if let Some(identity) = self.identity.take() {
            self.pool.release(identity);
        }
        if let Some(reply) = self.pending_play.take() {
            let _ = reply.send(Err(Error::SessionClosed));
        }

        self.state = SessionState::Closed;
        info!("Session for chat {} closed: {}", self.chat, reason);
        let _ = self.closed_tx.send((self.chat, self.epoch));
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            chat: self.chat,
            state: self.state,
            volume: self.volume,
            speed: self.speed,
            muted: self.muted,
            loop_enabled: self.queue.loop_enabled(),
            current: self.queue.current().cloned(),
            queued: self.queue.len(),
        }
    }
}

/// Resolve, retrying once against the configured fallback platform.
/// The primary error is surfaced when the fallback fails too.
async fn resolve_with_fallback(
    resolver: Arc<dyn MediaResolver>,
    slots: Arc<Semaphore>,
    request: String,
    platform: Platform,
    fallback: Option<Platform>,
) -> std::result::Result<SourceRef, ResolveError> {
    let _permit = slots.acquire_owned().await.ok();
    match resolver.resolve(&request, platform).await {
        Ok(source) => Ok(source),
        Err(primary) => match fallback {
            Some(alt) => {
                warn!(
                    "Resolution on {} failed ({}), retrying on {}",
                    platform, primary, alt
                );
                resolver.resolve(&request, alt).await.map_err(|_| primary)
            }
            None => Err(primary),
        },
    }
}
