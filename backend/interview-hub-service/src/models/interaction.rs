use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kind of recorded interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractionType {
    Question,
    Answer,
    Note,
    ScreenShare,
    CodeSubmission,
    Whiteboard,
    ChatMessage,
    SystemEvent,
}

impl InteractionType {
    /// Everything except system events originates from a participant.
    pub fn is_user_generated(&self) -> bool {
        !matches!(self, InteractionType::SystemEvent)
    }

    /// Types whose payload is the text itself and must not be blank.
    pub fn requires_content(&self) -> bool {
        matches!(
            self,
            InteractionType::Question
                | InteractionType::Answer
                | InteractionType::Note
                | InteractionType::ChatMessage
        )
    }
}

/// Persisted interaction. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub session_id: Uuid,
    pub interaction_type: InteractionType,
    pub content: String,
    pub participant_id: Uuid,
    pub sequence_number: i64,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: Option<u32>,
    pub metadata: HashMap<String, String>,
    pub created_by: Uuid,
    pub correlation_id: Option<String>,
}

/// Inbound interaction event as delivered by a transport adapter.
///
/// `participant_id` comes from the identity layer and is trusted as given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub session_id: Uuid,
    pub participant_id: Uuid,
    #[serde(rename = "type")]
    pub interaction_type: InteractionType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Limits applied to inbound events before any session state is touched
#[derive(Debug, Clone, Copy)]
pub struct EventLimits {
    pub max_content_bytes: usize,
    pub max_metadata_entries: usize,
}

impl Default for EventLimits {
    fn default() -> Self {
        Self {
            max_content_bytes: 64 * 1024,
            max_metadata_entries: 32,
        }
    }
}

impl InteractionEvent {
    /// Reject malformed events. Returns a human readable reason.
    pub fn check(&self, limits: &EventLimits) -> Result<(), String> {
        if self.interaction_type.requires_content() && self.content.trim().is_empty() {
            return Err(format!(
                "{:?} interactions require non-empty content",
                self.interaction_type
            ));
        }
        if self.content.len() > limits.max_content_bytes {
            return Err(format!(
                "content is {} bytes, limit is {}",
                self.content.len(),
                limits.max_content_bytes
            ));
        }
        if self.metadata.len() > limits.max_metadata_entries {
            return Err(format!(
                "{} metadata entries, limit is {}",
                self.metadata.len(),
                limits.max_metadata_entries
            ));
        }
        Ok(())
    }

    /// Materialize the persisted record for an allocated sequence number.
    pub fn into_interaction(self, sequence_number: i64, timestamp: DateTime<Utc>) -> Interaction {
        Interaction {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            interaction_type: self.interaction_type,
            content: self.content,
            participant_id: self.participant_id,
            sequence_number,
            timestamp,
            duration_seconds: self.duration_seconds,
            metadata: self.metadata,
            created_by: self.participant_id,
            correlation_id: self.correlation_id,
        }
    }
}

/// Interaction body as submitted by a client. Session and participant come
/// from the route and the identity layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInteraction {
    pub interaction_type: InteractionType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl NewInteraction {
    pub fn into_event(self, session_id: Uuid, participant_id: Uuid) -> InteractionEvent {
        InteractionEvent {
            session_id,
            participant_id,
            interaction_type: self.interaction_type,
            content: self.content,
            duration_seconds: self.duration_seconds,
            metadata: self.metadata,
            correlation_id: self.correlation_id,
        }
    }
}

/// Inclusive time window over interaction timestamps. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn is_empty_interval(&self) -> bool {
        matches!((self.start, self.end), (Some(s), Some(e)) if s > e)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }
}

/// Canonical history order: timestamp ascending, ties by sequence number.
pub fn sort_history(interactions: &mut [Interaction]) {
    interactions.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.sequence_number.cmp(&b.sequence_number))
    });
}
