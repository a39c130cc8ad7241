use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::interaction::{Interaction, InteractionType};
use super::session::{Session, SessionStatus};

/// What happened to the interaction a message refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageAction {
    Create,
    Update,
    Delete,
    TypingStart,
    TypingStop,
    ParticipantJoined,
    ParticipantLeft,
    SessionStateChanged,
}

/// Outbound message on a session's interactions topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionMessage {
    pub session_id: Uuid,
    pub message_id: Uuid,
    pub action: MessageAction,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub interaction_type: Option<InteractionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl InteractionMessage {
    /// CREATE message mirroring a persisted interaction.
    pub fn created(interaction: &Interaction) -> Self {
        Self {
            session_id: interaction.session_id,
            message_id: interaction.id,
            action: MessageAction::Create,
            interaction_type: Some(interaction.interaction_type),
            content: Some(interaction.content.clone()),
            participant_id: Some(interaction.participant_id),
            timestamp: interaction.timestamp,
            sequence_number: Some(interaction.sequence_number),
            duration_seconds: interaction.duration_seconds,
            metadata: interaction.metadata.clone(),
            correlation_id: interaction.correlation_id.clone(),
        }
    }

    /// DELETE message. Carries ids only; the removed content is not reloaded.
    pub fn deleted(session_id: Uuid, interaction_id: Uuid, requested_by: Uuid) -> Self {
        Self::bare(session_id, interaction_id, MessageAction::Delete, requested_by)
    }

    /// Ephemeral typing indicator with a fresh message id.
    pub fn typing(session_id: Uuid, participant_id: Uuid, is_typing: bool) -> Self {
        let action = if is_typing {
            MessageAction::TypingStart
        } else {
            MessageAction::TypingStop
        };
        Self::bare(session_id, Uuid::new_v4(), action, participant_id)
    }

    fn bare(session_id: Uuid, message_id: Uuid, action: MessageAction, participant: Uuid) -> Self {
        Self {
            session_id,
            message_id,
            action,
            interaction_type: None,
            content: None,
            participant_id: Some(participant),
            timestamp: Utc::now(),
            sequence_number: None,
            duration_seconds: None,
            metadata: HashMap::new(),
            correlation_id: None,
        }
    }
}

/// Kind of session-level notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEventType {
    SessionStarted,
    SessionEnded,
    SessionPaused,
    SessionResumed,
    SessionCancelled,
    ParticipantJoined,
    ParticipantLeft,
    StatusChanged,
}

impl SessionEventType {
    pub fn describe(&self) -> &'static str {
        match self {
            SessionEventType::SessionStarted => "Session started",
            SessionEventType::SessionEnded => "Session ended",
            SessionEventType::SessionPaused => "Session paused",
            SessionEventType::SessionResumed => "Session resumed",
            SessionEventType::SessionCancelled => "Session cancelled",
            SessionEventType::ParticipantJoined => "Participant joined the session",
            SessionEventType::ParticipantLeft => "Participant left the session",
            SessionEventType::StatusChanged => "Session status changed",
        }
    }
}

/// Lifecycle notification. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEventMessage {
    pub session_id: Uuid,
    pub event_type: SessionEventType,
    pub session_status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<Uuid>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_data: Option<JsonValue>,
}

impl SessionEventMessage {
    pub fn new(session: &Session, event_type: SessionEventType, triggered_by: Option<Uuid>) -> Self {
        Self {
            session_id: session.id,
            event_type,
            session_status: session.status,
            triggered_by,
            message: event_type.describe().to_string(),
            timestamp: Utc::now(),
            event_data: None,
        }
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.event_data = Some(data);
        self
    }
}

/// Anything the hub pushes to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum OutboundMessage {
    Interaction(InteractionMessage),
    SessionEvent(SessionEventMessage),
}

/// Broadcast destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    SessionInteractions(Uuid),
    SessionEvents(Uuid),
    /// Per-participant channel for guaranteed lifecycle delivery.
    ParticipantQueue(Uuid),
}

impl Topic {
    /// Session a topic belongs to. Private queues belong to no session.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            Topic::SessionInteractions(id) | Topic::SessionEvents(id) => Some(*id),
            Topic::ParticipantQueue(_) => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::SessionInteractions(id) => write!(f, "/topic/session/{id}/interactions"),
            Topic::SessionEvents(id) => write!(f, "/topic/session/{id}/events"),
            Topic::ParticipantQueue(id) => write!(f, "/user/{id}/queue/session-events"),
        }
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A message addressed to a topic, as handed to a connection.
///
/// The payload is shared between all recipients of one publish.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: Topic,
    pub message: Arc<OutboundMessage>,
}

impl Delivery {
    pub fn new(topic: Topic, message: OutboundMessage) -> Self {
        Self {
            topic,
            message: Arc::new(message),
        }
    }

    /// Same payload, different destination.
    pub fn readdressed(&self, topic: Topic) -> Self {
        Self {
            topic,
            message: Arc::clone(&self.message),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&serde_json::json!({
            "destination": self.topic,
            "payload": self.message.as_ref(),
        }))
    }
}
