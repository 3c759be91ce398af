use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

use tgmcalls::{
    CallHandle, CallTransport, ChatCommand, ChatGateway, CommandReply, Error, GatewayError,
    MediaResolver, ResolveError, SessionManager, SessionPolicy, SessionState, TransportError,
    TransportEvent,
};
use tgmpool::{Identity, IdentityPool};
use tgmtrack::{ChatId, Platform, SourceRef};

/// Scripted resolver:
/// - `slow:<x>`  blocks until the gate is opened, then resolves
/// - `fail:<x>`  always fails with NotFound
/// - `ytfail:<x>` fails on YouTube only (exercises the fallback)
/// - anything else resolves immediately to a 3-minute stream URL
#[derive(Default)]
struct FakeResolver {
    gate: Notify,
    attempts: Mutex<Vec<(String, Platform)>>,
}

impl FakeResolver {
    fn attempts(&self) -> Vec<(String, Platform)> {
        self.attempts.lock().unwrap().clone()
    }

    fn ok(title: &str) -> SourceRef {
        SourceRef::url(format!("https://stream.test/{title}"), title)
            .with_duration(Duration::from_secs(180))
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    async fn resolve(
        &self,
        request: &str,
        platform: Platform,
    ) -> Result<SourceRef, ResolveError> {
        self.attempts
            .lock()
            .unwrap()
            .push((request.to_string(), platform));
        if let Some(rest) = request.strip_prefix("slow:") {
            self.gate.notified().await;
            return Ok(Self::ok(rest));
        }
        if request.starts_with("fail:") {
            return Err(ResolveError::NotFound);
        }
        if let Some(rest) = request.strip_prefix("ytfail:") {
            if platform == Platform::Youtube {
                return Err(ResolveError::Transient("extractor broke".into()));
            }
            return Ok(Self::ok(rest));
        }
        Ok(Self::ok(request))
    }
}

#[derive(Default)]
struct TransportLog {
    joined: HashMap<CallHandle, ChatId>,
    join_identities: Vec<(ChatId, String)>,
    played: Vec<(ChatId, String)>,
    ops: Vec<String>,
    leaves: usize,
}

struct FakeTransport {
    events: broadcast::Sender<TransportEvent>,
    next_handle: AtomicU64,
    participants: AtomicU32,
    fail_join: AtomicBool,
    streaming: AtomicBool,
    log: Mutex<TransportLog>,
}

impl FakeTransport {
    fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            next_handle: AtomicU64::new(1),
            participants: AtomicU32::new(5),
            fail_join: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            log: Mutex::new(TransportLog::default()),
        }
    }

    fn played(&self) -> Vec<(ChatId, String)> {
        self.log.lock().unwrap().played.clone()
    }

    fn played_titles(&self) -> Vec<String> {
        self.played().into_iter().map(|(_, t)| t).collect()
    }

    fn join_identities(&self) -> Vec<(ChatId, String)> {
        self.log.lock().unwrap().join_identities.clone()
    }

    fn ops(&self) -> Vec<String> {
        self.log.lock().unwrap().ops.clone()
    }

    fn leaves(&self) -> usize {
        self.log.lock().unwrap().leaves
    }

    fn finish_track(&self, chat: ChatId) {
        let _ = self.events.send(TransportEvent::TrackFinished(chat));
    }

    fn end_call(&self, chat: ChatId) {
        let _ = self.events.send(TransportEvent::CallEnded(chat));
    }
}

#[async_trait]
impl CallTransport for FakeTransport {
    async fn join(
        &self,
        chat: ChatId,
        identity: &Identity,
    ) -> Result<CallHandle, TransportError> {
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(TransportError::Server("join refused".into()));
        }
        let handle = CallHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let mut log = self.log.lock().unwrap();
        log.joined.insert(handle, chat);
        log.join_identities.push((chat, identity.id().0.clone()));
        Ok(handle)
    }

    async fn leave(&self, handle: CallHandle) -> Result<(), TransportError> {
        let mut log = self.log.lock().unwrap();
        log.joined.remove(&handle);
        log.leaves += 1;
        Ok(())
    }

    async fn play(&self, handle: CallHandle, source: &SourceRef) -> Result<(), TransportError> {
        let mut log = self.log.lock().unwrap();
        let chat = *log.joined.get(&handle).ok_or(TransportError::NoActiveCall)?;
        log.played.push((chat, source.title.clone()));
        self.streaming.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn pause(&self, _handle: CallHandle) -> Result<(), TransportError> {
        self.log.lock().unwrap().ops.push("pause".into());
        Ok(())
    }

    async fn resume(&self, _handle: CallHandle) -> Result<(), TransportError> {
        self.log.lock().unwrap().ops.push("resume".into());
        Ok(())
    }

    async fn set_volume(&self, _handle: CallHandle, level: u16) -> Result<(), TransportError> {
        self.log.lock().unwrap().ops.push(format!("volume:{level}"));
        Ok(())
    }

    async fn set_muted(&self, _handle: CallHandle, muted: bool) -> Result<(), TransportError> {
        self.log.lock().unwrap().ops.push(format!("mute:{muted}"));
        Ok(())
    }

    async fn seek(&self, _handle: CallHandle, offset: Duration) -> Result<(), TransportError> {
        self.log
            .lock()
            .unwrap()
            .ops
            .push(format!("seek:{}", offset.as_secs()));
        Ok(())
    }

    async fn set_speed(&self, _handle: CallHandle, factor: f64) -> Result<(), TransportError> {
        self.log.lock().unwrap().ops.push(format!("speed:{factor}"));
        Ok(())
    }

    async fn participants(&self, _handle: CallHandle) -> Result<u32, TransportError> {
        Ok(self.participants.load(Ordering::SeqCst))
    }

    async fn is_streaming(&self, _handle: CallHandle) -> Result<bool, TransportError> {
        Ok(self.streaming.load(Ordering::SeqCst))
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

struct FakeGateway {
    members: Mutex<HashMap<ChatId, u32>>,
    deny_manage: Mutex<HashSet<ChatId>>,
}

impl FakeGateway {
    fn new() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            deny_manage: Mutex::new(HashSet::new()),
        }
    }

    fn set_members(&self, chat: ChatId, count: u32) {
        self.members.lock().unwrap().insert(chat, count);
    }

    fn deny_manage(&self, chat: ChatId) {
        self.deny_manage.lock().unwrap().insert(chat);
    }
}

#[async_trait]
impl ChatGateway for FakeGateway {
    async fn member_count(&self, chat: ChatId) -> Result<u32, GatewayError> {
        Ok(*self.members.lock().unwrap().get(&chat).unwrap_or(&100))
    }

    async fn can_manage_calls(&self, chat: ChatId) -> Result<bool, GatewayError> {
        Ok(!self.deny_manage.lock().unwrap().contains(&chat))
    }
}

struct Harness {
    manager: SessionManager,
    pool: Arc<IdentityPool>,
    resolver: Arc<FakeResolver>,
    transport: Arc<FakeTransport>,
    gateway: Arc<FakeGateway>,
}

fn harness_with(identities: usize, policy: SessionPolicy) -> Harness {
    let pool = Arc::new(IdentityPool::from_session_strings(
        (0..identities).map(|i| format!("session-{i}")),
    ));
    let resolver = Arc::new(FakeResolver::default());
    let transport = Arc::new(FakeTransport::new());
    let gateway = Arc::new(FakeGateway::new());
    let manager = SessionManager::new(
        Arc::clone(&pool),
        resolver.clone() as Arc<dyn MediaResolver>,
        transport.clone() as Arc<dyn CallTransport>,
        gateway.clone() as Arc<dyn ChatGateway>,
        policy,
    );
    Harness {
        manager,
        pool,
        resolver,
        transport,
        gateway,
    }
}

fn harness(identities: usize) -> Harness {
    harness_with(identities, SessionPolicy::default())
}

fn play(request: &str) -> ChatCommand {
    ChatCommand::Play {
        request: request.into(),
        platform: None,
        requested_by: "tester".into(),
    }
}

async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn play_queue_skip_flow() {
    let h = harness(2);
    let chat = ChatId(10);

    let reply = h.manager.handle_command(chat, play("alpha")).await.unwrap();
    assert_eq!(
        reply,
        CommandReply::NowPlaying {
            title: "alpha".into()
        }
    );
    assert_eq!(h.pool.in_use_count(), 1);

    let reply = h.manager.handle_command(chat, play("beta")).await.unwrap();
    assert_eq!(reply, CommandReply::Queued { position: 0 });

    match h
        .manager
        .handle_command(chat, ChatCommand::Status)
        .await
        .unwrap()
    {
        CommandReply::Status(snapshot) => {
            assert_eq!(snapshot.state, SessionState::Playing);
            assert_eq!(snapshot.queued, 1);
            assert_eq!(snapshot.current.unwrap().title(), "alpha");
        }
        other => panic!("unexpected reply {other:?}"),
    }

    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Skip)
        .await
        .unwrap();
    assert_eq!(
        reply,
        CommandReply::Skipped {
            next: Some("beta".into())
        }
    );
    eventually("beta to start", || {
        h.transport.played_titles() == vec!["alpha", "beta"]
    })
    .await;

    // Skipping the last track ends the session.
    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Skip)
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::Skipped { next: None });
    eventually("identity released", || h.pool.free_count() == 2).await;
    assert_eq!(h.transport.leaves(), 1);
}

#[tokio::test]
async fn pause_resume_are_idempotent() {
    let h = harness(1);
    let chat = ChatId(11);
    h.manager.handle_command(chat, play("alpha")).await.unwrap();

    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Pause)
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::State(SessionState::Paused));
    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Pause)
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::State(SessionState::Paused));

    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Resume)
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::State(SessionState::Playing));
    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Resume)
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::State(SessionState::Playing));

    // The transport only saw the two effective transitions.
    assert_eq!(h.transport.ops(), vec!["pause", "resume"]);
}

#[tokio::test]
async fn commands_without_a_session_are_rejected() {
    let h = harness(1);
    let chat = ChatId(12);
    for cmd in [
        ChatCommand::Pause,
        ChatCommand::Skip,
        ChatCommand::Volume(80),
        ChatCommand::Queue,
    ] {
        let err = h.manager.handle_command(chat, cmd).await.unwrap_err();
        assert_eq!(err, Error::NotActive);
    }
}

#[tokio::test]
async fn controls_are_rejected_while_joining() {
    let h = harness(1);
    let chat = ChatId(13);

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.handle_command(chat, play("slow:alpha")).await });
    eventually("resolution to start", || !h.resolver.attempts().is_empty()).await;

    let err = h
        .manager
        .handle_command(chat, ChatCommand::Seek(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidStateTransition {
            state: SessionState::Joining,
            ..
        }
    ));
    let err = h
        .manager
        .handle_command(chat, ChatCommand::Pause)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidStateTransition {
            state: SessionState::Joining,
            ..
        }
    ));

    h.resolver.gate.notify_one();
    let reply = pending.await.unwrap().unwrap();
    assert_eq!(
        reply,
        CommandReply::NowPlaying {
            title: "alpha".into()
        }
    );
}

#[tokio::test]
async fn skip_during_resolution_discards_the_stale_result() {
    let h = harness(1);
    let chat = ChatId(14);

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.handle_command(chat, play("slow:alpha")).await });
    eventually("resolution to start", || !h.resolver.attempts().is_empty()).await;

    let reply = h.manager.handle_command(chat, play("beta")).await.unwrap();
    assert_eq!(reply, CommandReply::Queued { position: 0 });

    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Skip)
        .await
        .unwrap();
    assert_eq!(
        reply,
        CommandReply::Skipped {
            next: Some("beta".into())
        }
    );

    // The deferred play reply is answered by whatever starts first.
    let reply = pending.await.unwrap().unwrap();
    assert_eq!(
        reply,
        CommandReply::NowPlaying {
            title: "beta".into()
        }
    );

    // Even once the slow resolution is unblocked, alpha never plays
    // and the session keeps its identity.
    h.resolver.gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.played_titles(), vec!["beta"]);
    assert_eq!(h.pool.in_use_count(), 1);
}

#[tokio::test]
async fn stop_during_resolution_releases_the_identity() {
    let h = harness(1);
    let chat = ChatId(15);

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.handle_command(chat, play("slow:alpha")).await });
    eventually("resolution to start", || !h.resolver.attempts().is_empty()).await;
    assert_eq!(h.pool.in_use_count(), 1);

    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Stop)
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::Stopped);
    assert_eq!(pending.await.unwrap().unwrap_err(), Error::SessionClosed);

    eventually("identity released", || h.pool.free_count() == 1).await;
    h.resolver.gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.transport.played_titles().is_empty());
}

#[tokio::test]
async fn identity_exhaustion_and_reuse_after_stop() {
    let h = harness(2);
    let (c1, c2, c3) = (ChatId(20), ChatId(21), ChatId(22));

    h.manager.handle_command(c1, play("a")).await.unwrap();
    h.manager.handle_command(c2, play("b")).await.unwrap();

    let err = h.manager.handle_command(c3, play("c")).await.unwrap_err();
    assert!(matches!(err, Error::Exhausted(_)));

    h.manager.handle_command(c1, ChatCommand::Stop).await.unwrap();
    eventually("identity back in the pool", || h.pool.free_count() == 1).await;

    let reply = h.manager.handle_command(c3, play("c")).await.unwrap();
    assert_eq!(reply, CommandReply::NowPlaying { title: "c".into() });
}

#[tokio::test]
async fn chat_reuses_its_previous_identity() {
    let h = harness(3);
    let chat = ChatId(23);

    h.manager.handle_command(chat, play("a")).await.unwrap();
    h.manager.handle_command(chat, ChatCommand::Stop).await.unwrap();
    eventually("identity released", || h.pool.free_count() == 3).await;

    h.manager.handle_command(chat, play("b")).await.unwrap();
    let identities = h.transport.join_identities();
    assert_eq!(identities.len(), 2);
    assert_eq!(identities[0].1, identities[1].1);
}

#[tokio::test]
async fn policy_rejects_before_allocating_anything() {
    let h = harness(2);

    let small = ChatId(30);
    h.gateway.set_members(small, 10);
    let err = h.manager.handle_command(small, play("a")).await.unwrap_err();
    assert!(matches!(err, Error::PolicyRejected(_)));

    let unmanaged = ChatId(31);
    h.gateway.deny_manage(unmanaged);
    let err = h
        .manager
        .handle_command(unmanaged, play("a"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PolicyRejected(_)));

    assert_eq!(h.pool.free_count(), 2);
    assert_eq!(h.manager.session_count().await, 0);
}

#[tokio::test]
async fn failed_first_resolution_returns_the_session_to_idle() {
    let h = harness(1);
    let chat = ChatId(32);

    let err = h
        .manager
        .handle_command(chat, play("fail:nope"))
        .await
        .unwrap_err();
    assert_eq!(err, Error::ResolutionFailed(ResolveError::NotFound));
    eventually("identity released", || h.pool.free_count() == 1).await;

    // The session is still there and usable.
    let reply = h.manager.handle_command(chat, play("alpha")).await.unwrap();
    assert_eq!(
        reply,
        CommandReply::NowPlaying {
            title: "alpha".into()
        }
    );
}

#[tokio::test]
async fn resolution_falls_back_to_the_next_platform() {
    let h = harness(1);
    let chat = ChatId(33);

    let reply = h
        .manager
        .handle_command(chat, play("ytfail:tune"))
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::NowPlaying { title: "tune".into() });

    let attempts = h.resolver.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].1, Platform::Youtube);
    assert_eq!(attempts[1].1, Platform::JioSaavn);
}

#[tokio::test]
async fn finished_tracks_advance_then_close_the_session() {
    let h = harness(1);
    let chat = ChatId(34);

    h.manager.handle_command(chat, play("alpha")).await.unwrap();
    h.manager.handle_command(chat, play("beta")).await.unwrap();

    h.transport.finish_track(chat);
    eventually("beta to start", || {
        h.transport.played_titles() == vec!["alpha", "beta"]
    })
    .await;

    h.transport.finish_track(chat);
    eventually("session closed", || h.pool.free_count() == 1).await;
    assert_eq!(h.transport.leaves(), 1);
}

#[tokio::test]
async fn loop_mode_replays_the_current_track() {
    let h = harness(1);
    let chat = ChatId(35);

    h.manager.handle_command(chat, play("alpha")).await.unwrap();
    let reply = h
        .manager
        .handle_command(chat, ChatCommand::SetLoop(true))
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::LoopSet(true));

    h.transport.finish_track(chat);
    eventually("alpha to replay", || {
        h.transport.played_titles() == vec!["alpha", "alpha"]
    })
    .await;

    h.manager
        .handle_command(chat, ChatCommand::SetLoop(false))
        .await
        .unwrap();
    h.transport.finish_track(chat);
    eventually("session closed", || h.pool.free_count() == 1).await;
}

#[tokio::test]
async fn external_call_end_tears_the_session_down() {
    let h = harness(1);
    let chat = ChatId(36);

    h.manager.handle_command(chat, play("alpha")).await.unwrap();
    h.transport.end_call(chat);
    eventually("identity released", || h.pool.free_count() == 1).await;
    for _ in 0..400 {
        if h.manager.session_count().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("registry entry was never reaped");
}

#[tokio::test]
async fn volume_and_mute_controls() {
    let h = harness(1);
    let chat = ChatId(37);
    h.manager.handle_command(chat, play("alpha")).await.unwrap();

    let err = h
        .manager
        .handle_command(chat, ChatCommand::Volume(0))
        .await
        .unwrap_err();
    assert_eq!(err, Error::InvalidVolume(0));
    let err = h
        .manager
        .handle_command(chat, ChatCommand::Volume(201))
        .await
        .unwrap_err();
    assert_eq!(err, Error::InvalidVolume(201));

    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Volume(150))
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::VolumeSet(150));
    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Mute(true))
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::MuteSet(true));
    assert_eq!(h.transport.ops(), vec!["volume:150", "mute:true"]);
}

#[tokio::test]
async fn clear_drops_waiting_tracks_but_not_the_current_one() {
    let h = harness(1);
    let chat = ChatId(42);
    h.manager.handle_command(chat, play("alpha")).await.unwrap();
    h.manager.handle_command(chat, play("beta")).await.unwrap();
    h.manager.handle_command(chat, play("gamma")).await.unwrap();

    let reply = h
        .manager
        .handle_command(chat, ChatCommand::ClearQueue)
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::Cleared { removed: 2 });

    match h
        .manager
        .handle_command(chat, ChatCommand::Status)
        .await
        .unwrap()
    {
        CommandReply::Status(snapshot) => {
            assert_eq!(snapshot.state, SessionState::Playing);
            assert_eq!(snapshot.queued, 0);
            assert_eq!(snapshot.current.unwrap().title(), "alpha");
        }
        other => panic!("unexpected reply {other:?}"),
    }

    // With nothing waiting, the finished track ends the session.
    h.transport.finish_track(chat);
    eventually("session closed", || h.pool.free_count() == 1).await;
}

#[tokio::test]
async fn remove_drops_one_waiting_track_by_position() {
    let h = harness(1);
    let chat = ChatId(43);
    h.manager.handle_command(chat, play("alpha")).await.unwrap();
    h.manager.handle_command(chat, play("beta")).await.unwrap();
    h.manager.handle_command(chat, play("gamma")).await.unwrap();

    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Remove(0))
        .await
        .unwrap();
    assert_eq!(
        reply,
        CommandReply::Removed {
            title: "beta".into()
        }
    );

    let err = h
        .manager
        .handle_command(chat, ChatCommand::Remove(5))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::Queue(tgmqueue::Error::OutOfRange { index: 5, len: 1 })
    );

    // The survivor is next up.
    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Skip)
        .await
        .unwrap();
    assert_eq!(
        reply,
        CommandReply::Skipped {
            next: Some("gamma".into())
        }
    );
}

#[tokio::test]
async fn clear_and_remove_require_a_session() {
    let h = harness(1);
    let chat = ChatId(44);
    for cmd in [ChatCommand::ClearQueue, ChatCommand::Remove(0)] {
        let err = h.manager.handle_command(chat, cmd).await.unwrap_err();
        assert_eq!(err, Error::NotActive);
    }
}

#[tokio::test]
async fn speed_control_validates_its_range() {
    let h = harness(1);
    let chat = ChatId(45);
    h.manager.handle_command(chat, play("alpha")).await.unwrap();

    let err = h
        .manager
        .handle_command(chat, ChatCommand::Speed(0.25))
        .await
        .unwrap_err();
    assert_eq!(err, Error::InvalidSpeed(0.25));
    let err = h
        .manager
        .handle_command(chat, ChatCommand::Speed(4.5))
        .await
        .unwrap_err();
    assert_eq!(err, Error::InvalidSpeed(4.5));

    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Speed(1.5))
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::SpeedSet(1.5));
    assert_eq!(h.transport.ops(), vec!["speed:1.5"]);

    match h
        .manager
        .handle_command(chat, ChatCommand::Status)
        .await
        .unwrap()
    {
        CommandReply::Status(snapshot) => assert_eq!(snapshot.speed, 1.5),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[tokio::test]
async fn missed_track_finished_is_resynced_by_the_sweep() {
    let policy = SessionPolicy {
        sweep_interval: Duration::from_millis(30),
        ..SessionPolicy::default()
    };
    let h = harness_with(1, policy);
    let chat = ChatId(46);

    h.manager.handle_command(chat, play("alpha")).await.unwrap();
    h.manager.handle_command(chat, play("beta")).await.unwrap();

    // The stream ends but the notification is lost.
    h.transport.streaming.store(false, Ordering::SeqCst);
    eventually("sweep to advance to beta", || {
        h.transport.played_titles() == vec!["alpha", "beta"]
    })
    .await;

    // And the same path closes the session once the queue is drained.
    h.transport.streaming.store(false, Ordering::SeqCst);
    eventually("session closed", || h.pool.free_count() == 1).await;
}

#[tokio::test]
async fn seek_beyond_the_track_is_rejected() {
    let h = harness(1);
    let chat = ChatId(38);
    h.manager.handle_command(chat, play("alpha")).await.unwrap();

    let err = h
        .manager
        .handle_command(chat, ChatCommand::Seek(Duration::from_secs(400)))
        .await
        .unwrap_err();
    assert_eq!(err, Error::InvalidSeek);

    let reply = h
        .manager
        .handle_command(chat, ChatCommand::Seek(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(reply, CommandReply::Seeked);
    assert_eq!(h.transport.ops(), vec!["seek:30"]);
}

#[tokio::test]
async fn join_failure_closes_the_session() {
    let h = harness(1);
    let chat = ChatId(39);
    h.transport.fail_join.store(true, Ordering::SeqCst);

    let err = h.manager.handle_command(chat, play("alpha")).await.unwrap_err();
    assert!(matches!(err, Error::TransportFailed(_)));
    eventually("identity released", || h.pool.free_count() == 1).await;
}

#[tokio::test]
async fn empty_calls_are_swept() {
    let policy = SessionPolicy {
        sweep_interval: Duration::from_millis(30),
        ..SessionPolicy::default()
    };
    let h = harness_with(1, policy);
    let chat = ChatId(40);
    h.transport.participants.store(1, Ordering::SeqCst);

    h.manager.handle_command(chat, play("alpha")).await.unwrap();
    eventually("empty call to be closed", || h.pool.free_count() == 1).await;
}

#[tokio::test]
async fn idle_sessions_expire_after_the_grace_period() {
    let policy = SessionPolicy {
        sweep_interval: Duration::from_millis(30),
        idle_grace: Duration::from_millis(50),
        ..SessionPolicy::default()
    };
    let h = harness_with(1, policy);
    let chat = ChatId(41);

    // A failed first resolution leaves the session Idle.
    let _ = h
        .manager
        .handle_command(chat, play("fail:nope"))
        .await
        .unwrap_err();
    assert_eq!(h.manager.session_count().await, 1);

    for _ in 0..400 {
        if h.manager.session_count().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("idle session was never swept");
}

#[tokio::test]
async fn shutdown_stops_every_session() {
    let h = harness(3);
    for chat in [ChatId(50), ChatId(51), ChatId(52)] {
        h.manager.handle_command(chat, play("alpha")).await.unwrap();
    }
    assert_eq!(h.pool.in_use_count(), 3);

    h.manager.shutdown().await;
    eventually("all identities released", || h.pool.free_count() == 3).await;
}
