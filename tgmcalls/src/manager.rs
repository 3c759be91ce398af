//! Session registry and routing.
//!
//! The manager owns one session actor per active chat, gates session
//! creation behind the chat policy, fans transport events out to the
//! right actor, and reaps registry entries once their actor stops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, RwLock, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use tgmpool::IdentityPool;
use tgmtrack::ChatId;

use crate::capabilities::{CallTransport, ChatGateway, MediaResolver, TransportEvent};
use crate::errors::{Error, Result};
use crate::model::{ChatCommand, CommandReply, SessionPolicy};
use crate::session::{self, SessionEvent, SessionHandle, SessionMsg};

/// Front door of the playback core: one instance per bot process.
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    sessions: RwLock<HashMap<ChatId, SessionHandle>>,
    pool: Arc<IdentityPool>,
    resolver: Arc<dyn MediaResolver>,
    transport: Arc<dyn CallTransport>,
    gateway: Arc<dyn ChatGateway>,
    policy: Arc<SessionPolicy>,
    /// Global bound on concurrent resolutions, shared by all sessions.
    resolve_slots: Arc<Semaphore>,
    /// Distinguishes a closed session from its successor in the same
    /// chat when the reaper catches up.
    next_epoch: AtomicU64,
    closed_tx: mpsc::UnboundedSender<(ChatId, u64)>,
}

impl SessionManager {
    pub fn new(
        pool: Arc<IdentityPool>,
        resolver: Arc<dyn MediaResolver>,
        transport: Arc<dyn CallTransport>,
        gateway: Arc<dyn ChatGateway>,
        policy: SessionPolicy,
    ) -> Self {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ManagerInner {
            sessions: RwLock::new(HashMap::new()),
            resolve_slots: Arc::new(Semaphore::new(policy.resolve_slots)),
            policy: Arc::new(policy),
            next_epoch: AtomicU64::new(0),
            pool,
            resolver,
            transport,
            gateway,
            closed_tx,
        });
        let manager = Self { inner };
        manager.spawn_event_pump();
        manager.spawn_reaper(closed_rx);
        manager.spawn_sweeper();
        manager
    }

    /// Route a command to the chat's session.
    ///
    /// A play command creates the session on demand (after the policy
    /// check); every other command requires one to exist already.
    pub async fn handle_command(&self, chat: ChatId, cmd: ChatCommand) -> Result<CommandReply> {
        let tx = if cmd.creates_session() {
            self.check_policy(chat).await?;
            self.get_or_create(chat).await
        } else {
            self.get(chat).await.ok_or(Error::NotActive)?
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(SessionMsg::Command {
            cmd,
            reply: reply_tx,
        })
        .map_err(|_| Error::SessionClosed)?;
        reply_rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Chats with a live session.
    pub async fn active_chats(&self) -> Vec<ChatId> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .iter()
            .filter(|(_, handle)| !handle.is_closed())
            .map(|(chat, _)| *chat)
            .collect()
    }

    pub async fn session_count(&self) -> usize {
        self.active_chats().await.len()
    }

    /// Stop every session, releasing all identities.
    pub async fn shutdown(&self) {
        let chats = self.active_chats().await;
        info!("Shutting down {} session(s)", chats.len());
        for chat in chats {
            if let Err(e) = self.handle_command(chat, ChatCommand::Stop).await {
                debug!("Chat {}: stop during shutdown failed: {}", chat, e);
            }
        }
    }

    async fn check_policy(&self, chat: ChatId) -> Result<()> {
        // Skip the gateway round-trips for chats that already passed.
        if self.get(chat).await.is_some() {
            return Ok(());
        }
        let members = self.inner.gateway.member_count(chat).await?;
        if members < self.inner.policy.min_member_count {
            return Err(Error::PolicyRejected(format!(
                "group has {} members, {} required",
                members, self.inner.policy.min_member_count
            )));
        }
        if !self.inner.gateway.can_manage_calls(chat).await? {
            return Err(Error::PolicyRejected(
                "bot lacks permission to manage video chats in this group".into(),
            ));
        }
        Ok(())
    }

    async fn get(&self, chat: ChatId) -> Option<mpsc::UnboundedSender<SessionMsg>> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(&chat)
            .filter(|handle| !handle.is_closed())
            .map(|handle| handle.tx.clone())
    }

    async fn get_or_create(&self, chat: ChatId) -> mpsc::UnboundedSender<SessionMsg> {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(handle) = sessions.get(&chat) {
            if !handle.is_closed() {
                return handle.tx.clone();
            }
        }
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        let handle = session::spawn(
            chat,
            epoch,
            Arc::clone(&self.inner.pool),
            Arc::clone(&self.inner.resolver),
            Arc::clone(&self.inner.transport),
            Arc::clone(&self.inner.policy),
            Arc::clone(&self.inner.resolve_slots),
            self.inner.closed_tx.clone(),
        );
        let tx = handle.tx.clone();
        sessions.insert(chat, handle);
        tx
    }

    /// Forward transport notifications to the owning session.
    fn spawn_event_pump(&self) {
        let inner = Arc::clone(&self.inner);
        let mut events = inner.transport.events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let chat = event.chat();
                        let msg = match event {
                            TransportEvent::TrackFinished(_) => SessionEvent::TrackFinished,
                            TransportEvent::CallEnded(_) | TransportEvent::Kicked(_) => {
                                SessionEvent::CallEnded
                            }
                        };
                        let sessions = inner.sessions.read().await;
                        if let Some(handle) = sessions.get(&chat) {
                            let _ = handle.tx.send(SessionMsg::Event(msg));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Some notifications are gone for good; sweep
                        // every session so a missed track-finished
                        // cannot leave one stuck in Playing.
                        warn!(
                            "Transport event stream lagged by {} events, resyncing sessions",
                            n
                        );
                        let sessions = inner.sessions.read().await;
                        for handle in sessions.values() {
                            let _ = handle.tx.send(SessionMsg::Event(SessionEvent::Sweep));
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Transport event pump stopped");
        });
    }

    /// Drop registry entries for sessions that reached Closed. The
    /// epoch guard keeps a freshly re-created session for the same
    /// chat out of the reaper's hands.
    fn spawn_reaper(&self, mut closed_rx: mpsc::UnboundedReceiver<(ChatId, u64)>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some((chat, epoch)) = closed_rx.recv().await {
                let mut sessions = inner.sessions.write().await;
                if sessions.get(&chat).is_some_and(|h| h.epoch == epoch) {
                    sessions.remove(&chat);
                    debug!("Registry entry for chat {} reaped", chat);
                }
            }
        });
    }

    /// Periodic idle / empty-call / resync sweep. Delivered over the
    /// normal command lane, so a sweep never races a user command.
    fn spawn_sweeper(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.policy.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let txs: Vec<_> = {
                    let sessions = inner.sessions.read().await;
                    sessions.values().map(|h| h.tx.clone()).collect()
                };
                for tx in txs {
                    let _ = tx.send(SessionMsg::Event(SessionEvent::Sweep));
                }
            }
        });
    }
}
