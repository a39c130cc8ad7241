//! Persistence collaborators of the hub.
//!
//! The hub only depends on these traits. Storage engines live elsewhere; the
//! in-memory implementations in [`memory`] back the binary and the tests.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Interaction, Session, TimeRange};

pub mod memory;

pub use memory::{InMemoryInteractionStore, InMemorySessionStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("stale write for {id}: expected version {expected}, stored version {actual}")]
    VersionConflict { id: Uuid, expected: i64, actual: i64 },

    #[error("sequence {sequence} already used in session {session_id}")]
    DuplicateSequence { session_id: Uuid, sequence: i64 },

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable append-only record of interactions keyed by session
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Persist a new interaction. A `(session_id, sequence_number)` pair may
    /// only ever be stored once.
    async fn save(&self, interaction: Interaction) -> StoreResult<Interaction>;

    async fn find(&self, id: Uuid) -> StoreResult<Option<Interaction>>;

    /// Remove an interaction. Returns the removed record.
    async fn delete(&self, id: Uuid) -> StoreResult<Interaction>;

    /// Interactions of a session ordered by timestamp, ties by sequence number.
    async fn find_by_session(
        &self,
        session_id: Uuid,
        range: TimeRange,
    ) -> StoreResult<Vec<Interaction>>;

    /// Highest sequence number ever stored for the session, 0 if none.
    ///
    /// This is a high-water mark: deleting the newest interaction must not
    /// lower it, otherwise a number could be handed out twice after restart.
    async fn last_sequence(&self, session_id: Uuid) -> StoreResult<i64>;

    async fn next_sequence(&self, session_id: Uuid) -> StoreResult<i64> {
        Ok(self.last_sequence(session_id).await? + 1)
    }
}

/// Session persistence with optimistic concurrency control
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Session>>;

    async fn exists(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Store a new session. The returned copy carries version 1.
    async fn insert(&self, session: Session) -> StoreResult<Session>;

    /// Replace a stored session. `session.version` must equal the stored
    /// version; the returned copy carries the bumped version.
    async fn save(&self, session: Session) -> StoreResult<Session>;
}
