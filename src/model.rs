//! Platform-agnostic conversation and message shapes the operator view
//! renders from.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Whatsapp,
    Instagram,
    Gmail,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Whatsapp, Platform::Instagram, Platform::Gmail];

    /// Path segment and `channel` value used by the REST proxies.
    pub fn slug(self) -> &'static str {
        match self {
            Platform::Whatsapp => "whatsapp",
            Platform::Instagram => "instagram",
            Platform::Gmail => "gmail",
        }
    }

    pub fn supports_read_receipts(self) -> bool {
        !matches!(self, Platform::Gmail)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Ok(Platform::Whatsapp),
            "instagram" => Ok(Platform::Instagram),
            "gmail" => Ok(Platform::Gmail),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Consulta,
    Pedido,
    Reclamo,
    #[default]
    SinCategoria,
}

impl Category {
    /// Unknown or missing categories collapse to `SinCategoria`.
    pub fn parse_lossy(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse().ok()).unwrap_or_default()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Consulta => "consulta",
            Category::Pedido => "pedido",
            Category::Reclamo => "reclamo",
            Category::SinCategoria => "sin_categoria",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "consulta" => Ok(Category::Consulta),
            "pedido" => Ok(Category::Pedido),
            "reclamo" => Ok(Category::Reclamo),
            "sin_categoria" => Ok(Category::SinCategoria),
            other => Err(format!("unknown category '{other}'")),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Me,
    User,
}

/// Where a message stands relative to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    /// Carries a backend id.
    Confirmed,
    /// Optimistic entry, network call in flight or server echo awaited.
    Pending,
    /// Adapter accepted it but returned no backend id and no echo is coming.
    Sent,
    /// Adapter call failed. Kept visible, never retried automatically.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub time: String,
    /// Backend numeric identity; `None` while an optimistic entry is unconfirmed.
    pub message_id: Option<i64>,
    pub is_read: bool,
    pub delivery: Delivery,
    pub client_key: Option<String>,
}

impl Message {
    pub fn is_unread_inbound(&self) -> bool {
        self.sender == Sender::User && !self.is_read
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participant_name: String,
    pub participant_identifier: String,
    pub platform: Platform,
    pub channel_id: i64,
    pub external_id: Option<String>,
    pub is_active: bool,
    pub category: Category,
    /// False when the record carried no category at all.
    #[serde(skip)]
    pub category_reported: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    pub last_message_time: Option<String>,
    pub unread: bool,
    pub messages: Vec<Message>,
    /// False when the record came from a list call without embedded messages.
    #[serde(skip)]
    pub messages_loaded: bool,
}

impl Conversation {
    /// Recomputes `last_message`, `last_message_time` and `unread` from the
    /// message sequence. Called after every mutation.
    pub fn refresh_derived(&mut self) {
        match self.messages.last() {
            Some(last) => {
                self.last_message = Some(last.text.clone());
                self.last_message_time = Some(last.time.clone());
            }
            None => {
                self.last_message = None;
                self.last_message_time = None;
            }
        }
        self.unread = self.messages.iter().any(Message::is_unread_inbound);
    }

    pub fn contains_message_id(&self, message_id: i64) -> bool {
        self.messages.iter().any(|m| m.message_id == Some(message_id))
    }

    /// Inserts a confirmed message keeping ascending backend-id order.
    /// Unconfirmed optimistic entries do not take part in the comparison.
    pub fn insert_ordered(&mut self, message: Message) {
        let Some(new_id) = message.message_id else {
            self.messages.push(message);
            return;
        };
        let pos = self
            .messages
            .iter()
            .position(|m| m.message_id.is_some_and(|id| id > new_id))
            .unwrap_or(self.messages.len());
        self.messages.insert(pos, message);
    }

    pub fn unread_inbound_ids(&self) -> Vec<i64> {
        self.messages
            .iter()
            .filter(|m| m.is_unread_inbound())
            .filter_map(|m| m.message_id)
            .collect()
    }
}
