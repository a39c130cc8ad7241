use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use super::message::SessionEventType;

/// Lifecycle status of an interview session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Scheduled,
    Active,
    Paused,
    Completed,
    Cancelled,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "SCHEDULED",
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Paused => "PAUSED",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Cancelled => "CANCELLED",
            SessionStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Expired
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition requested against a session's status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleTransition {
    /// SCHEDULED -> ACTIVE, and PAUSED -> ACTIVE (resume)
    Start,
    Pause,
    End,
    Cancel,
    Expire,
}

impl LifecycleTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleTransition::Start => "start",
            LifecycleTransition::Pause => "pause",
            LifecycleTransition::End => "end",
            LifecycleTransition::Cancel => "cancel",
            LifecycleTransition::Expire => "expire",
        }
    }
}

/// Rejected transition, carrying the status the session was in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub transition: LifecycleTransition,
    pub status: SessionStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot {} session in status {}",
            self.transition.as_str(),
            self.status
        )
    }
}

/// Which fixed role a participant holds in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Interviewer,
    Candidate,
}

/// Interview session between one interviewer and one candidate.
///
/// Interactions are not held here; they reference the session by id and the
/// interaction store keeps the per-session ordered index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub interviewer_id: Uuid,
    pub candidate_id: Uuid,
    pub status: SessionStatus,
    pub session_type: String,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    /// Optimistic lock counter, owned by the session store.
    pub version: i64,
}

/// Request to create a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub interviewer_id: Uuid,
    pub candidate_id: Uuid,
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    pub session_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Session {
    /// Build a SCHEDULED session. Version 0 means "not yet stored".
    pub fn new(request: NewSession, created_by: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            interviewer_id: request.interviewer_id,
            candidate_id: request.candidate_id,
            status: SessionStatus::Scheduled,
            session_type: request.session_type,
            scheduled_time: request.scheduled_time,
            start_time: None,
            end_time: None,
            metadata: request.metadata,
            created_at: now,
            updated_at: now,
            created_by,
            version: 0,
        }
    }

    pub fn can_join(&self) -> bool {
        matches!(self.status, SessionStatus::Scheduled | SessionStatus::Active)
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn role_of(&self, participant_id: Uuid) -> Option<ParticipantRole> {
        if participant_id == self.interviewer_id {
            Some(ParticipantRole::Interviewer)
        } else if participant_id == self.candidate_id {
            Some(ParticipantRole::Candidate)
        } else {
            None
        }
    }

    pub fn is_participant(&self, participant_id: Uuid) -> bool {
        self.role_of(participant_id).is_some()
    }

    /// Both fixed roles, interviewer first.
    pub fn participants(&self) -> [Uuid; 2] {
        [self.interviewer_id, self.candidate_id]
    }

    /// Apply a lifecycle transition in place.
    ///
    /// Returns the event to announce. The session is left untouched when the
    /// transition is not allowed from the current status.
    pub fn apply(
        &mut self,
        transition: LifecycleTransition,
        now: DateTime<Utc>,
    ) -> Result<SessionEventType, InvalidTransition> {
        use LifecycleTransition as T;
        use SessionStatus as S;

        let invalid = InvalidTransition {
            transition,
            status: self.status,
        };

        let event = match (transition, self.status) {
            (T::Start, S::Scheduled) => {
                self.status = S::Active;
                self.start_time = Some(now);
                SessionEventType::SessionStarted
            }
            // Resume keeps the original start time.
            (T::Start, S::Paused) => {
                self.status = S::Active;
                SessionEventType::SessionResumed
            }
            (T::Pause, S::Active) => {
                self.status = S::Paused;
                SessionEventType::SessionPaused
            }
            (T::End, S::Active) => {
                self.status = S::Completed;
                self.end_time = Some(now);
                SessionEventType::SessionEnded
            }
            (T::Cancel, S::Scheduled | S::Active | S::Paused) => {
                self.status = S::Cancelled;
                self.end_time = Some(now);
                SessionEventType::SessionCancelled
            }
            (T::Expire, S::Scheduled | S::Paused) => {
                self.status = S::Expired;
                self.end_time = Some(now);
                SessionEventType::StatusChanged
            }
            _ => return Err(invalid),
        };

        self.updated_at = now;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduled() -> Session {
        Session::new(
            NewSession {
                interviewer_id: Uuid::new_v4(),
                candidate_id: Uuid::new_v4(),
                scheduled_time: None,
                session_type: "technical".into(),
                metadata: HashMap::new(),
            },
            None,
        )
    }

    fn with_status(status: SessionStatus) -> Session {
        let mut session = scheduled();
        session.status = status;
        session
    }

    #[test]
    fn test_start_sets_active_and_start_time() {
        let mut session = scheduled();
        let event = session
            .apply(LifecycleTransition::Start, Utc::now())
            .unwrap();

        assert_eq!(event, SessionEventType::SessionStarted);
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.start_time.is_some());
        assert!(session.can_join());
        assert!(session.is_active());
    }

    #[test]
    fn test_resume_keeps_start_time() {
        let mut session = scheduled();
        let started_at = Utc::now() - chrono::Duration::minutes(10);
        session.apply(LifecycleTransition::Start, started_at).unwrap();
        session.apply(LifecycleTransition::Pause, Utc::now()).unwrap();
        assert!(!session.can_join());

        let event = session
            .apply(LifecycleTransition::Start, Utc::now())
            .unwrap();
        assert_eq!(event, SessionEventType::SessionResumed);
        assert_eq!(session.start_time, Some(started_at));
    }

    #[test]
    fn test_end_only_from_active() {
        for status in [
            SessionStatus::Scheduled,
            SessionStatus::Paused,
            SessionStatus::Completed,
            SessionStatus::Cancelled,
            SessionStatus::Expired,
        ] {
            let mut session = with_status(status);
            let err = session
                .apply(LifecycleTransition::End, Utc::now())
                .unwrap_err();
            assert_eq!(err.status, status);
            assert_eq!(session.status, status);
            assert!(session.end_time.is_none());
        }

        let mut session = with_status(SessionStatus::Active);
        session.apply(LifecycleTransition::End, Utc::now()).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.end_time.is_some());
        assert!(session.is_completed());
    }

    #[test]
    fn test_cancel_non_terminal() {
        for status in [
            SessionStatus::Scheduled,
            SessionStatus::Active,
            SessionStatus::Paused,
        ] {
            let mut session = with_status(status);
            let event = session
                .apply(LifecycleTransition::Cancel, Utc::now())
                .unwrap();
            assert_eq!(event, SessionEventType::SessionCancelled);
            assert_eq!(session.status, SessionStatus::Cancelled);
            assert!(session.end_time.is_some());
            assert!(!session.can_join());
        }
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let transitions = [
            LifecycleTransition::Start,
            LifecycleTransition::Pause,
            LifecycleTransition::End,
            LifecycleTransition::Cancel,
            LifecycleTransition::Expire,
        ];
        for status in [
            SessionStatus::Completed,
            SessionStatus::Cancelled,
            SessionStatus::Expired,
        ] {
            for transition in transitions {
                let mut session = with_status(status);
                assert!(session.apply(transition, Utc::now()).is_err());
                assert!(session.is_completed());
            }
        }
    }

    #[test]
    fn test_pause_scheduled_is_rejected_with_status() {
        let mut session = scheduled();
        let err = session
            .apply(LifecycleTransition::Pause, Utc::now())
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot pause session in status SCHEDULED");
    }

    #[test]
    fn test_role_lookup() {
        let session = scheduled();
        assert_eq!(
            session.role_of(session.interviewer_id),
            Some(ParticipantRole::Interviewer)
        );
        assert_eq!(
            session.role_of(session.candidate_id),
            Some(ParticipantRole::Candidate)
        );
        assert_eq!(session.role_of(Uuid::new_v4()), None);
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_string(&SessionStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
    }
}
