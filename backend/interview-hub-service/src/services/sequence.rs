//! Per-session sequence numbers.
//!
//! Each session gets one async mutex, created on first use and kept in a
//! keyed map so sessions never contend with each other. Holding the mutex
//! (a [`SessionLease`]) is what serializes sequence-and-persist for a
//! session. The counter is seeded from the store's high-water mark, so
//! numbers keep increasing across restarts.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{InteractionStore, SessionStore};

#[derive(Debug, Default)]
struct SequenceState {
    // None until seeded from the store.
    last: Option<i64>,
}

pub struct SequenceAllocator {
    sessions: Arc<dyn SessionStore>,
    interactions: Arc<dyn InteractionStore>,
    counters: DashMap<Uuid, Arc<Mutex<SequenceState>>>,
}

/// Exclusive hold on a session's ordering state.
///
/// Dropping the lease without [`SessionLease::commit`] leaves the counter
/// where it was, so an aborted write never burns a number.
pub struct SessionLease {
    session_id: Uuid,
    interactions: Arc<dyn InteractionStore>,
    state: OwnedMutexGuard<SequenceState>,
}

impl SessionLease {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Number the next persisted interaction must carry.
    pub async fn peek_next(&mut self) -> AppResult<i64> {
        let last = match self.state.last {
            Some(last) => last,
            None => {
                let last = self.interactions.last_sequence(self.session_id).await?;
                self.state.last = Some(last);
                last
            }
        };
        Ok(last + 1)
    }

    /// Record that `sequence` is now taken.
    pub fn commit(&mut self, sequence: i64) {
        let last = self.state.last.unwrap_or(0);
        self.state.last = Some(last.max(sequence));
    }
}

impl SequenceAllocator {
    pub fn new(sessions: Arc<dyn SessionStore>, interactions: Arc<dyn InteractionStore>) -> Self {
        Self {
            sessions,
            interactions,
            counters: DashMap::new(),
        }
    }

    /// Wait for exclusive access to a session's ordering state.
    pub async fn lease(&self, session_id: Uuid) -> AppResult<SessionLease> {
        if !self.sessions.exists(session_id).await? {
            return Err(AppError::NotFound(format!("session {session_id}")));
        }

        // Clone the handle out so the map shard is not held across the await.
        let handle = self
            .counters
            .entry(session_id)
            .or_default()
            .value()
            .clone();
        let state = handle.lock_owned().await;

        Ok(SessionLease {
            session_id,
            interactions: Arc::clone(&self.interactions),
            state,
        })
    }

    /// Allocate and commit the next number for a session.
    pub async fn next(&self, session_id: Uuid) -> AppResult<i64> {
        let mut lease = self.lease(session_id).await?;
        let sequence = lease.peek_next().await?;
        lease.commit(sequence);
        Ok(sequence)
    }

    /// Drop the in-memory handle of a session nobody is using.
    ///
    /// A handle that is held or awaited has more than one strong reference
    /// and is kept; the next lease would otherwise race a fresh counter.
    pub fn evict(&self, session_id: Uuid) -> bool {
        self.counters
            .remove_if(&session_id, |_, handle| Arc::strong_count(handle) == 1)
            .is_some()
    }

    pub fn tracked_sessions(&self) -> usize {
        self.counters.len()
    }
}
