use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{InteractionStore, SessionStore, StoreError, StoreResult};
use crate::models::interaction::sort_history;
use crate::models::{Interaction, Session, TimeRange};

#[derive(Default)]
struct InteractionTables {
    by_id: HashMap<Uuid, Interaction>,
    // session_id -> sequence_number -> interaction_id
    by_session: HashMap<Uuid, BTreeMap<i64, Uuid>>,
    high_water: HashMap<Uuid, i64>,
}

/// Process-local interaction store
#[derive(Default)]
pub struct InMemoryInteractionStore {
    inner: RwLock<InteractionTables>,
}

impl InMemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, session_id: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard.by_session.get(&session_id).map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl InteractionStore for InMemoryInteractionStore {
    async fn save(&self, interaction: Interaction) -> StoreResult<Interaction> {
        let mut guard = self.inner.write().await;
        let tables = &mut *guard;

        let index = tables.by_session.entry(interaction.session_id).or_default();
        if index.contains_key(&interaction.sequence_number) {
            return Err(StoreError::DuplicateSequence {
                session_id: interaction.session_id,
                sequence: interaction.sequence_number,
            });
        }
        index.insert(interaction.sequence_number, interaction.id);

        let mark = tables.high_water.entry(interaction.session_id).or_insert(0);
        *mark = (*mark).max(interaction.sequence_number);

        tables.by_id.insert(interaction.id, interaction.clone());
        Ok(interaction)
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Interaction>> {
        let guard = self.inner.read().await;
        Ok(guard.by_id.get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<Interaction> {
        let mut guard = self.inner.write().await;
        let removed = guard
            .by_id
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("interaction {id}")))?;

        if let Some(index) = guard.by_session.get_mut(&removed.session_id) {
            index.remove(&removed.sequence_number);
        }
        Ok(removed)
    }

    async fn find_by_session(
        &self,
        session_id: Uuid,
        range: TimeRange,
    ) -> StoreResult<Vec<Interaction>> {
        let guard = self.inner.read().await;
        let mut items: Vec<Interaction> = guard
            .by_session
            .get(&session_id)
            .into_iter()
            .flat_map(|index| index.values())
            .filter_map(|id| guard.by_id.get(id))
            .filter(|i| range.contains(i.timestamp))
            .cloned()
            .collect();
        sort_history(&mut items);
        Ok(items)
    }

    async fn last_sequence(&self, session_id: Uuid) -> StoreResult<i64> {
        let guard = self.inner.read().await;
        Ok(guard.high_water.get(&session_id).copied().unwrap_or(0))
    }
}

/// Process-local session store with version checks
#[derive(Default)]
pub struct InMemorySessionStore {
    inner: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Session>> {
        let guard = self.inner.read().await;
        Ok(guard.get(&id).cloned())
    }

    async fn insert(&self, mut session: Session) -> StoreResult<Session> {
        let mut guard = self.inner.write().await;
        if guard.contains_key(&session.id) {
            return Err(StoreError::VersionConflict {
                id: session.id,
                expected: 0,
                actual: guard.get(&session.id).map(|s| s.version).unwrap_or(0),
            });
        }
        session.version = 1;
        guard.insert(session.id, session.clone());
        Ok(session)
    }

    async fn save(&self, mut session: Session) -> StoreResult<Session> {
        let mut guard = self.inner.write().await;
        let stored = guard
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session.id)))?;

        if stored.version != session.version {
            return Err(StoreError::VersionConflict {
                id: session.id,
                expected: session.version,
                actual: stored.version,
            });
        }

        session.version += 1;
        *stored = session.clone();
        Ok(session)
    }
}
