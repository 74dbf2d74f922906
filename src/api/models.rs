use serde::{Deserialize, Serialize};

/// Conversation as returned by a channel proxy. Every field is optional on
/// the wire so a partial record still decodes; the mapper decides what is
/// required.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ConversationRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub participant_name: Option<String>,
    #[serde(default)]
    pub participant_identifier: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub channel_id: Option<i64>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Only present when fetching a single conversation.
    #[serde(default)]
    pub messages: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MessageRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_identifier: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<i64>,
    #[serde(default)]
    pub external_message_id: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    /// Idempotency key echoed back by adapters that support it.
    #[serde(default)]
    pub client_message_id: Option<String>,
}

impl MessageRecord {
    pub fn is_inbound(&self) -> bool {
        matches!(self.direction.as_str(), "inbound" | "incoming")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SendMessageRequest {
    pub channel: String,
    pub to: String,
    pub message: String,
    pub message_type: String,
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SendMessageResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

/// Body of the audit collaborator's log endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryEntry {
    pub user: String,
    pub action: String,
    pub action_type: String,
    pub details: String,
    pub endpoint: Option<String>,
    pub method: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ListQuery {
    pub limit: u32,
    pub offset: u32,
}

fn default_true() -> bool {
    true
}
