//! # Broadcast Router
//!
//! Single entry point for everything participants do inside a session.
//!
//! ## Ordering
//!
//! For one session, `process_interaction` and `delete_interaction` run
//! under the session lease from [`SequenceAllocator`]: validate, number,
//! persist. Before the lease is released the router takes the session's
//! publish slot, so deliveries leave in the same order records were
//! persisted, while the fan-out itself happens outside the lease.
//! Different sessions share nothing but the keyed maps.
//!
//! ## Failure
//!
//! Validation failures return before anything is written. A failed save
//! propagates and nothing is published; the lease is dropped without commit
//! so the sequence number is reused by the next submission.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::lifecycle::SessionLifecycleCoordinator;
use super::sequence::SequenceAllocator;
use crate::error::{AppError, AppResult};
use crate::models::interaction::sort_history;
use crate::models::{
    EventLimits, Interaction, InteractionEvent, InteractionMessage, NewInteraction, Session,
    SessionEventMessage, SessionEventType, TimeRange,
};
use crate::store::InteractionStore;
use crate::websocket::{Broadcaster, SessionRegistry};

pub struct BroadcastRouter {
    interactions: Arc<dyn InteractionStore>,
    allocator: Arc<SequenceAllocator>,
    lifecycle: Arc<SessionLifecycleCoordinator>,
    broadcaster: Broadcaster,
    limits: EventLimits,
}

impl BroadcastRouter {
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        allocator: Arc<SequenceAllocator>,
        lifecycle: Arc<SessionLifecycleCoordinator>,
        broadcaster: Broadcaster,
        limits: EventLimits,
    ) -> Self {
        Self {
            interactions,
            allocator,
            lifecycle,
            broadcaster,
            limits,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        self.broadcaster.registry()
    }

    pub fn lifecycle(&self) -> &SessionLifecycleCoordinator {
        &self.lifecycle
    }

    /// Validate, sequence, persist and broadcast one interaction.
    pub async fn process_interaction(&self, event: InteractionEvent) -> AppResult<Interaction> {
        event.check(&self.limits).map_err(AppError::Validation)?;

        let session_id = event.session_id;
        let mut lease = self.allocator.lease(session_id).await?;

        let session = self.lifecycle.joinable_session(session_id).await?;
        if event.interaction_type.is_user_generated() && !session.is_participant(event.participant_id)
        {
            return Err(AppError::Validation(format!(
                "participant {} is not part of session {}",
                event.participant_id, session_id
            )));
        }

        let sequence = lease.peek_next().await?;
        let interaction = event.into_interaction(sequence, Utc::now());
        let saved = self.interactions.save(interaction).await.map_err(|e| {
            tracing::error!(
                session_id = %session_id,
                sequence,
                error = %e,
                "failed to persist interaction"
            );
            AppError::from(e)
        })?;
        lease.commit(saved.sequence_number);

        let slot = self.broadcaster.slot(session_id).await;
        drop(lease);
        let report = slot.publish_interaction(InteractionMessage::created(&saved));
        drop(slot);

        tracing::info!(
            session_id = %session_id,
            interaction_id = %saved.id,
            participant_id = %saved.participant_id,
            sequence = saved.sequence_number,
            delivered = report.delivered,
            "processed interaction"
        );
        Ok(saved)
    }

    /// Submit an interaction that arrived from a client connection.
    ///
    /// Clients only ever author participant content; system events are
    /// produced inside the hub.
    pub async fn submit_from_client(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        body: NewInteraction,
    ) -> AppResult<Interaction> {
        if !body.interaction_type.is_user_generated() {
            tracing::warn!(
                session_id = %session_id,
                participant_id = %participant_id,
                "rejected client-submitted system event"
            );
            return Err(AppError::Validation(
                "system events cannot be submitted by participants".into(),
            ));
        }
        self.process_interaction(body.into_event(session_id, participant_id))
            .await
    }

    /// Delete an interaction on behalf of its author and broadcast DELETE.
    pub async fn delete_interaction(
        &self,
        interaction_id: Uuid,
        requesting_participant_id: Uuid,
    ) -> AppResult<()> {
        let interaction = self
            .interactions
            .find(interaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("interaction {interaction_id}")))?;

        if interaction.participant_id != requesting_participant_id {
            tracing::warn!(
                interaction_id = %interaction_id,
                requested_by = %requesting_participant_id,
                "rejected delete by non-author"
            );
            return Err(AppError::Authorization(
                "participants can only delete their own interactions".into(),
            ));
        }

        let session_id = interaction.session_id;
        // Ordered with creates: a DELETE never overtakes its CREATE.
        let lease = self.allocator.lease(session_id).await?;
        self.interactions.delete(interaction_id).await?;

        let slot = self.broadcaster.slot(session_id).await;
        drop(lease);
        slot.publish_interaction(InteractionMessage::deleted(
            session_id,
            interaction_id,
            requesting_participant_id,
        ));

        tracing::info!(
            session_id = %session_id,
            interaction_id = %interaction_id,
            "deleted interaction"
        );
        Ok(())
    }

    /// Broadcast a typing indicator. Nothing is stored or sequenced.
    pub async fn handle_typing(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        is_typing: bool,
    ) -> AppResult<()> {
        self.lifecycle.get_session(session_id).await?;

        tracing::debug!(
            "Typing indicator for session: {}, participant: {}, typing: {}",
            session_id,
            participant_id,
            is_typing
        );
        self.broadcaster
            .slot(session_id)
            .await
            .publish_interaction(InteractionMessage::typing(
                session_id,
                participant_id,
                is_typing,
            ));
        Ok(())
    }

    pub async fn handle_participant_joined(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> AppResult<()> {
        self.membership_event(session_id, participant_id, SessionEventType::ParticipantJoined)
            .await
    }

    pub async fn handle_participant_left(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> AppResult<()> {
        self.membership_event(session_id, participant_id, SessionEventType::ParticipantLeft)
            .await
    }

    /// Unsubscribe a participant everywhere and tell each session it left.
    ///
    /// Returns the sessions that were notified.
    pub async fn handle_disconnect(&self, participant_id: Uuid) -> Vec<Uuid> {
        let sessions = self.registry().disconnect(participant_id);
        for session_id in &sessions {
            match self.lifecycle.get_session(*session_id).await {
                Ok(session) => {
                    self.announce_membership(&session, participant_id, SessionEventType::ParticipantLeft)
                        .await
                }
                Err(e) => tracing::warn!(
                    session_id = %session_id,
                    participant_id = %participant_id,
                    error = %e,
                    "failed to announce disconnect"
                ),
            }
        }
        sessions
    }

    async fn membership_event(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        event_type: SessionEventType,
    ) -> AppResult<()> {
        let session = self.lifecycle.get_session(session_id).await?;
        if !session.is_participant(participant_id) {
            return Err(AppError::Authorization(format!(
                "participant {participant_id} is not part of session {session_id}"
            )));
        }

        let changed = match event_type {
            SessionEventType::ParticipantJoined => self.registry().subscribe(session_id, participant_id),
            _ => self.registry().unsubscribe(session_id, participant_id),
        };
        if !changed {
            tracing::debug!(
                "Membership of participant {} in session {} unchanged, nothing announced",
                participant_id,
                session_id
            );
            return Ok(());
        }

        self.announce_membership(&session, participant_id, event_type)
            .await;
        Ok(())
    }

    async fn announce_membership(
        &self,
        session: &Session,
        participant_id: Uuid,
        event_type: SessionEventType,
    ) {
        tracing::info!(
            "Participant {} {} session: {}",
            participant_id,
            if event_type == SessionEventType::ParticipantJoined {
                "joined"
            } else {
                "left"
            },
            session.id
        );

        let event = SessionEventMessage::new(session, event_type, Some(participant_id));
        self.broadcaster
            .slot(session.id)
            .await
            .announce(session, event);
    }

    /// Persisted interactions of a session, oldest first.
    pub async fn get_session_interactions(
        &self,
        session_id: Uuid,
        range: TimeRange,
    ) -> AppResult<Vec<Interaction>> {
        if range.is_empty_interval() {
            return Err(AppError::Validation(
                "time range start must not be after end".into(),
            ));
        }
        self.lifecycle.get_session(session_id).await?;

        let mut interactions = self.interactions.find_by_session(session_id, range).await?;
        sort_history(&mut interactions);
        Ok(interactions)
    }
}
