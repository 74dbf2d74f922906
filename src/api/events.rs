use serde::{Deserialize, Serialize};

use crate::api::models::MessageRecord;
use crate::error::EventError;

/// Wire envelope pushed by the live update channel.
#[derive(Debug, Serialize, Deserialize)]
pub struct IncomingEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    NewMessage(MessageRecord),
    MessageRead { message_id: i64 },
    /// Raw conversation record; only its mutable fields are applied.
    ConversationUpdated(serde_json::Value),
    Broadcast(String),
}

#[derive(Debug, Deserialize)]
struct ReadPayload {
    #[serde(alias = "message_id", rename = "messageId")]
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct BroadcastPayload {
    #[serde(default)]
    message: String,
}

impl LiveEvent {
    pub fn parse(text: &str) -> Result<Self, EventError> {
        let envelope: IncomingEvent = serde_json::from_str(text)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: IncomingEvent) -> Result<Self, EventError> {
        match envelope.event_type.as_str() {
            "new_message" => Ok(LiveEvent::NewMessage(serde_json::from_value(envelope.data)?)),
            "message_read" => {
                let payload: ReadPayload = serde_json::from_value(envelope.data)?;
                Ok(LiveEvent::MessageRead { message_id: payload.message_id })
            }
            "conversation_updated" => {
                if !envelope.data.is_object() {
                    return Err(EventError::Malformed(<serde_json::Error as serde::de::Error>::custom(
                        "conversation_updated payload is not an object",
                    )));
                }
                Ok(LiveEvent::ConversationUpdated(envelope.data))
            }
            "broadcast" => {
                let payload: BroadcastPayload = serde_json::from_value(envelope.data)?;
                Ok(LiveEvent::Broadcast(payload.message))
            }
            other => Err(EventError::UnknownType(other.to_string())),
        }
    }
}
