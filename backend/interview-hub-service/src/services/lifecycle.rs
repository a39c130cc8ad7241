//! Session lifecycle transitions.
//!
//! Each transition runs under the session lease. The publish slot is taken
//! before the lease is dropped, so announcements keep the order of the
//! transitions.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::sequence::SequenceAllocator;
use crate::error::{AppError, AppResult};
use crate::models::{LifecycleTransition, NewSession, Session, SessionEventMessage};
use crate::store::SessionStore;
use crate::websocket::Broadcaster;

/// Owns session status changes and announces them on the broadcast path
pub struct SessionLifecycleCoordinator {
    sessions: Arc<dyn SessionStore>,
    allocator: Arc<SequenceAllocator>,
    broadcaster: Broadcaster,
}

impl SessionLifecycleCoordinator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        allocator: Arc<SequenceAllocator>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            sessions,
            allocator,
            broadcaster,
        }
    }

    pub async fn create_session(
        &self,
        request: NewSession,
        created_by: Option<Uuid>,
    ) -> AppResult<Session> {
        if request.interviewer_id == request.candidate_id {
            return Err(AppError::Validation(
                "interviewer and candidate cannot be the same person".into(),
            ));
        }
        if request.session_type.trim().is_empty() {
            return Err(AppError::Validation("session type is required".into()));
        }
        if let Some(scheduled) = request.scheduled_time {
            if scheduled < Utc::now() {
                return Err(AppError::Validation(
                    "scheduled time cannot be in the past".into(),
                ));
            }
        }

        let session = self
            .sessions
            .insert(Session::new(request, created_by))
            .await?;

        tracing::info!(
            session_id = %session.id,
            interviewer_id = %session.interviewer_id,
            candidate_id = %session.candidate_id,
            "created session"
        );
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> AppResult<Session> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))
    }

    /// Load a session that accepts interactions (SCHEDULED or ACTIVE).
    pub async fn joinable_session(&self, session_id: Uuid) -> AppResult<Session> {
        let session = self.get_session(session_id).await?;
        if !session.can_join() {
            return Err(AppError::Validation(format!(
                "session is not available for interactions: {}",
                session.status
            )));
        }
        Ok(session)
    }

    pub async fn start(&self, session_id: Uuid, triggered_by: Option<Uuid>) -> AppResult<Session> {
        self.transition(session_id, LifecycleTransition::Start, triggered_by)
            .await
    }

    /// Resume a paused session. Same edge as start; the start time is kept.
    pub async fn resume(&self, session_id: Uuid, triggered_by: Option<Uuid>) -> AppResult<Session> {
        self.transition(session_id, LifecycleTransition::Start, triggered_by)
            .await
    }

    pub async fn pause(&self, session_id: Uuid, triggered_by: Option<Uuid>) -> AppResult<Session> {
        self.transition(session_id, LifecycleTransition::Pause, triggered_by)
            .await
    }

    pub async fn end(&self, session_id: Uuid, triggered_by: Option<Uuid>) -> AppResult<Session> {
        self.transition(session_id, LifecycleTransition::End, triggered_by)
            .await
    }

    pub async fn cancel(&self, session_id: Uuid, triggered_by: Option<Uuid>) -> AppResult<Session> {
        self.transition(session_id, LifecycleTransition::Cancel, triggered_by)
            .await
    }

    pub async fn expire(&self, session_id: Uuid, triggered_by: Option<Uuid>) -> AppResult<Session> {
        self.transition(session_id, LifecycleTransition::Expire, triggered_by)
            .await
    }

    /// Apply a transition, persist it and announce it.
    ///
    /// Runs under the session lease, so it is ordered with interaction
    /// submissions: nothing is persisted into a session after it went
    /// terminal.
    pub async fn transition(
        &self,
        session_id: Uuid,
        transition: LifecycleTransition,
        triggered_by: Option<Uuid>,
    ) -> AppResult<Session> {
        let lease = self.allocator.lease(session_id).await?;
        let mut session = self.get_session(session_id).await?;
        let previous = session.status;

        let event_type = session.apply(transition, Utc::now()).map_err(|e| {
            tracing::warn!(session_id = %session_id, "rejected lifecycle transition: {}", e);
            AppError::Validation(e.to_string())
        })?;

        let saved = self.sessions.save(session).await?;

        let slot = self.broadcaster.slot(session_id).await;
        drop(lease);

        let event = SessionEventMessage::new(&saved, event_type, triggered_by).with_data(json!({
            "transition": transition.as_str(),
            "previous_status": previous,
        }));
        let report = slot.announce(&saved, event);
        drop(slot);

        tracing::info!(
            session_id = %session_id,
            from = %previous,
            to = %saved.status,
            subscribers = report.subscribers,
            queued = report.queued,
            "session {}",
            transition.as_str()
        );

        if saved.is_completed() {
            self.allocator.evict(session_id);
            self.broadcaster.release(session_id);
        }
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutboundMessage, SessionEventType, SessionStatus, Topic};
    use crate::store::{InMemoryInteractionStore, InMemorySessionStore};
    use crate::websocket::SessionRegistry;
    use std::collections::HashMap;

    fn coordinator() -> (SessionLifecycleCoordinator, SessionRegistry) {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let interactions = Arc::new(InMemoryInteractionStore::new());
        let allocator = Arc::new(SequenceAllocator::new(sessions.clone(), interactions));
        let registry = SessionRegistry::new(16);
        let broadcaster = Broadcaster::new(registry.clone());
        (
            SessionLifecycleCoordinator::new(sessions, allocator, broadcaster),
            registry,
        )
    }

    fn request() -> NewSession {
        NewSession {
            interviewer_id: Uuid::new_v4(),
            candidate_id: Uuid::new_v4(),
            scheduled_time: Some(Utc::now() + chrono::Duration::hours(1)),
            session_type: "technical".into(),
            metadata: HashMap::from([("track".to_string(), "backend".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_same_person() {
        let (coordinator, _) = coordinator();
        let mut req = request();
        req.candidate_id = req.interviewer_id;
        let err = coordinator.create_session(req, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_past_schedule() {
        let (coordinator, _) = coordinator();
        let mut req = request();
        req.scheduled_time = Some(Utc::now() - chrono::Duration::hours(1));
        let err = coordinator.create_session(req, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (coordinator, _) = coordinator();
        let session = coordinator.create_session(request(), None).await.unwrap();
        assert_eq!(session.status, SessionStatus::Scheduled);
        assert_eq!(session.version, 1);

        let started = coordinator.start(session.id, None).await.unwrap();
        assert_eq!(started.status, SessionStatus::Active);
        let start_time = started.start_time;
        assert!(start_time.is_some());

        coordinator.pause(session.id, None).await.unwrap();
        let resumed = coordinator.resume(session.id, None).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Active);
        assert_eq!(resumed.start_time, start_time);

        let ended = coordinator.end(session.id, None).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
        assert!(ended.end_time.is_some());
        assert_eq!(ended.version, 5);
    }

    #[tokio::test]
    async fn test_invalid_transition_names_status() {
        let (coordinator, _) = coordinator();
        let session = coordinator.create_session(request(), None).await.unwrap();

        let err = coordinator.end(session.id, None).await.unwrap_err();
        assert_eq!(
            err,
            AppError::Validation("cannot end session in status SCHEDULED".into())
        );
        let unchanged = coordinator.get_session(session.id).await.unwrap();
        assert_eq!(unchanged.version, 1);
    }

    #[tokio::test]
    async fn test_cancel_blocks_joining() {
        let (coordinator, _) = coordinator();
        let session = coordinator.create_session(request(), None).await.unwrap();
        let cancelled = coordinator.cancel(session.id, None).await.unwrap();
        assert!(!cancelled.can_join());
        assert!(cancelled.end_time.is_some());

        let err = coordinator.joinable_session(session.id).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(coordinator.cancel(session.id, None).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_session_not_found() {
        let (coordinator, _) = coordinator();
        let err = coordinator.start(Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_transition_announced_to_roles() {
        let (coordinator, registry) = coordinator();
        let session = coordinator.create_session(request(), None).await.unwrap();
        let (_, mut rx) = registry.attach(session.candidate_id, session.id);

        coordinator
            .start(session.id, Some(session.interviewer_id))
            .await
            .unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.topic, Topic::ParticipantQueue(session.candidate_id));
        match delivery.message.as_ref() {
            OutboundMessage::SessionEvent(event) => {
                assert_eq!(event.event_type, SessionEventType::SessionStarted);
                assert_eq!(event.session_status, SessionStatus::Active);
                assert_eq!(event.triggered_by, Some(session.interviewer_id));
            }
            other => panic!("unexpected message {other:?}"),
        }
        // Interviewer is offline: the event waits in the inbox.
        assert_eq!(registry.pending_inbox(session.interviewer_id), 1);
    }
}
