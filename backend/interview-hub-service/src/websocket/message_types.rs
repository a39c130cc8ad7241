use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Interaction, NewInteraction};

/// Inbound WebSocket events from client to server
///
/// The session and participant are fixed by the connection, so frames never
/// carry them.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    /// Fields of [`NewInteraction`] sit next to the tag.
    #[serde(rename = "interaction")]
    Interaction(NewInteraction),
    #[serde(rename = "typing")]
    Typing { is_typing: bool },
    #[serde(rename = "delete_interaction")]
    DeleteInteraction { interaction_id: Uuid },
}

/// Frames the socket sends besides topic deliveries
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutboundFrame {
    /// Persisted interactions so far, sent once right after connect.
    History {
        session_id: Uuid,
        interactions: Vec<Interaction>,
    },
    /// The submitting connection learns the sequence number it got.
    Accepted {
        interaction_id: Uuid,
        sequence_number: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    Error {
        error: &'static str,
        message: String,
        retryable: bool,
    },
}

impl WsOutboundFrame {
    pub fn accepted(interaction: &Interaction) -> Self {
        WsOutboundFrame::Accepted {
            interaction_id: interaction.id,
            sequence_number: interaction.sequence_number,
            correlation_id: interaction.correlation_id.clone(),
        }
    }

    pub fn error(err: &AppError) -> Self {
        WsOutboundFrame::Error {
            error: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize outbound frame");
            r#"{"type":"error","error":"internal","message":"internal server error","retryable":true}"#
                .to_string()
        })
    }
}
