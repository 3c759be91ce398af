//! IdentityPool : mutex-guarded allocation table for streaming identities.

use crate::{Error, Identity, IdentityId, Result};
use rand::seq::IndexedRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tgmtrack::ChatId;
use tracing::{debug, info, warn};

struct PoolState {
    free: Vec<Identity>,
    in_use: HashMap<IdentityId, Identity>,
    /// Permanently out of rotation, with the reason.
    invalid: HashMap<IdentityId, String>,
    /// In-use identities flagged invalid; dropped instead of freed on release.
    pending_invalid: HashSet<IdentityId>,
    /// Last identity used per chat, preferred on re-acquisition.
    sticky: HashMap<ChatId, IdentityId>,
}

/// Bounded pool of streaming identities (one per configured session
/// string).
///
/// Acquisition is atomic with respect to concurrent callers: no two
/// sessions ever hold the same identity. Exhaustion is a normal
/// condition under load and is reported as [`Error::Exhausted`], never
/// by blocking.
pub struct IdentityPool {
    state: Mutex<PoolState>,
    size: usize,
}

impl IdentityPool {
    pub fn new(identities: Vec<Identity>) -> Self {
        let size = identities.len();
        info!("Identity pool created with {} identities", size);
        Self {
            state: Mutex::new(PoolState {
                free: identities,
                in_use: HashMap::new(),
                invalid: HashMap::new(),
                pending_invalid: HashSet::new(),
                sticky: HashMap::new(),
            }),
            size,
        }
    }

    /// Build a pool from raw session strings, naming identities
    /// `client1`, `client2`, ... in order.
    pub fn from_session_strings<I, S>(session_strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let identities = session_strings
            .into_iter()
            .enumerate()
            .map(|(i, s)| Identity::new(format!("client{}", i + 1), s))
            .collect();
        Self::new(identities)
    }

    /// Acquire any free identity.
    pub fn acquire(&self) -> Result<Identity> {
        let mut state = self.state.lock().unwrap();
        let picked = {
            let mut rng = rand::rng();
            state.free.choose(&mut rng).map(|i| i.id().clone())
        };
        match picked {
            Some(id) => Ok(take_free(&mut state, &id)),
            None => Err(Error::Exhausted),
        }
    }

    /// Acquire an identity for a chat, preferring the one last used
    /// there so a chat keeps seeing the same assistant account.
    pub fn acquire_for(&self, chat: ChatId) -> Result<Identity> {
        let mut state = self.state.lock().unwrap();

        if let Some(preferred) = state.sticky.get(&chat).cloned() {
            if state.free.iter().any(|i| i.id() == &preferred) {
                return Ok(take_free(&mut state, &preferred));
            }
        }

        let picked = {
            let mut rng = rand::rng();
            state.free.choose(&mut rng).map(|i| i.id().clone())
        };
        let Some(id) = picked else {
            return Err(Error::Exhausted);
        };
        info!("Assigning identity {} to chat {}", id, chat);
        state.sticky.insert(chat, id.clone());
        Ok(take_free(&mut state, &id))
    }

    /// Return an identity to the pool.
    ///
    /// Idempotent in effect: releasing an identity that is not in use
    /// is a no-op. An identity flagged invalid while in use leaves
    /// rotation here instead of rejoining the free list.
    pub fn release(&self, identity: Identity) {
        let mut state = self.state.lock().unwrap();
        let id = identity.id().clone();

        if state.in_use.remove(&id).is_none() {
            debug!("Ignoring release of identity {} (not in use)", id);
            return;
        }

        if state.pending_invalid.remove(&id) {
            warn!("Identity {} left rotation on release (flagged invalid)", id);
            state
                .invalid
                .insert(id, "invalidated while in use".to_string());
            return;
        }

        state.free.push(identity);
    }

    /// Remove an identity from rotation for the process lifetime.
    ///
    /// Operational event (authentication failure, revoked session):
    /// logged, not paired with a specific user command.
    pub fn invalidate(&self, id: &IdentityId, reason: &str) {
        let mut state = self.state.lock().unwrap();
        warn!("Invalidating identity {}: {}", id, reason);

        if let Some(pos) = state.free.iter().position(|i| i.id() == id) {
            state.free.remove(pos);
            state.invalid.insert(id.clone(), reason.to_string());
        } else if state.in_use.contains_key(id) {
            state.pending_invalid.insert(id.clone());
        } else if !state.invalid.contains_key(id) {
            warn!("Invalidate for unknown identity {}", id);
        }
    }

    /// Total number of configured identities, invalid ones included.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().unwrap().free.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.state.lock().unwrap().in_use.len()
    }

    pub fn invalid_count(&self) -> usize {
        self.state.lock().unwrap().invalid.len()
    }
}

fn take_free(state: &mut PoolState, id: &IdentityId) -> Identity {
    let pos = state
        .free
        .iter()
        .position(|i| i.id() == id)
        .expect("identity must be in the free list");
    let identity = state.free.remove(pos);
    state.in_use.insert(identity.id().clone(), identity.clone());
    identity
}
