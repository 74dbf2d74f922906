//! Turns channel proxy records into the canonical [`Conversation`] shape.
//!
//! Stateless apart from the channel table. Every record maps on its own: a
//! bad record yields a [`MapError`] for that record and the caller moves on.

use std::fmt::Display;

use chrono::{DateTime, Local, TimeZone, Utc};
use log::warn;
use serde_json::Value;

use crate::api::models::{ConversationRecord, MessageRecord};
use crate::app::ChannelTable;
use crate::error::MapError;
use crate::model::{Category, Conversation, Delivery, Message, Sender};
use crate::utils::parse_timestamp;

pub const FALLBACK_NAME: &str = "Usuario";
pub const YESTERDAY: &str = "yesterday";

/// Mutable conversation fields carried by a `conversation_updated` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationPatch {
    pub id: String,
    pub participant_name: Option<String>,
    pub participant_identifier: Option<String>,
    pub category: Option<Category>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct Mapper {
    channels: ChannelTable,
}

impl Mapper {
    pub fn new(channels: ChannelTable) -> Self {
        Self { channels }
    }

    pub fn map_conversation(&self, raw: &Value) -> Result<Conversation, MapError> {
        self.map_conversation_at(raw, Utc::now())
    }

    pub fn map_conversation_at(&self, raw: &Value, now: DateTime<Utc>) -> Result<Conversation, MapError> {
        let record: ConversationRecord =
            serde_json::from_value(raw.clone()).map_err(|e| MapError::Invalid(e.to_string()))?;
        let id = record.id.ok_or(MapError::MissingField("id"))?;
        let channel_id = record.channel_id.ok_or(MapError::MissingField("channel_id"))?;
        let platform = self
            .channels
            .platform_for(channel_id)
            .ok_or(MapError::UnknownChannel(channel_id))?;

        let messages_loaded = record.messages.is_some();
        let mut inbound: Vec<MessageRecord> = Vec::new();
        if let Some(raw_messages) = &record.messages {
            for raw_msg in raw_messages {
                match serde_json::from_value::<MessageRecord>(raw_msg.clone()) {
                    Ok(m) if m.id.is_some() => inbound.push(m),
                    Ok(_) => warn!("conversation {id}: dropping message without id"),
                    Err(e) => warn!("conversation {id}: dropping malformed message: {e}"),
                }
            }
        }
        // Delivery order is not guaranteed by the proxies.
        inbound.sort_by_key(|m| m.id);
        inbound.dedup_by_key(|m| m.id);

        let participant_identifier = record.participant_identifier.clone().unwrap_or_default();
        let participant_name = resolve_participant_name(
            record.participant_name.as_deref(),
            &inbound,
            &participant_identifier,
        );

        let messages = inbound
            .iter()
            .map(|m| self.map_message_at(m, now))
            .collect::<Result<Vec<_>, _>>()?;

        let mut conversation = Conversation {
            id: id.to_string(),
            participant_name,
            participant_identifier,
            platform,
            channel_id,
            external_id: record.external_id.clone(),
            is_active: record.is_active,
            category: Category::parse_lossy(record.category.as_deref()),
            category_reported: non_empty(record.category.as_deref()).is_some(),
            updated_at: record.updated_at.as_deref().and_then(parse_timestamp),
            last_message: None,
            last_message_time: None,
            unread: false,
            messages,
            messages_loaded,
        };
        conversation.refresh_derived();
        Ok(conversation)
    }

    /// Maps a batch, logging and dropping records that fail.
    pub fn map_batch(&self, raws: &[Value]) -> Vec<Conversation> {
        let now = Utc::now();
        raws.iter()
            .filter_map(|raw| match self.map_conversation_at(raw, now) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!("dropping conversation record: {e}");
                    None
                }
            })
            .collect()
    }

    pub fn map_message(&self, record: &MessageRecord) -> Result<Message, MapError> {
        self.map_message_at(record, Utc::now())
    }

    pub fn map_message_at(&self, record: &MessageRecord, now: DateTime<Utc>) -> Result<Message, MapError> {
        let id = record.id.ok_or(MapError::MissingField("id"))?;
        let time = record
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .map(|ts| format_relative(ts, now, &Local))
            .unwrap_or_default();
        Ok(Message {
            id: id.to_string(),
            text: record.content.clone(),
            sender: if record.is_inbound() { Sender::User } else { Sender::Me },
            time,
            message_id: Some(id),
            is_read: record.is_read,
            delivery: Delivery::Confirmed,
            client_key: record.client_message_id.clone(),
        })
    }

    pub fn map_patch(&self, raw: &Value) -> Result<ConversationPatch, MapError> {
        let record: ConversationRecord =
            serde_json::from_value(raw.clone()).map_err(|e| MapError::Invalid(e.to_string()))?;
        let id = record.id.ok_or(MapError::MissingField("id"))?;
        Ok(ConversationPatch {
            id: id.to_string(),
            participant_name: non_empty(record.participant_name.as_deref()).map(str::to_string),
            participant_identifier: non_empty(record.participant_identifier.as_deref()).map(str::to_string),
            category: non_empty(record.category.as_deref()).map(|c| Category::parse_lossy(Some(c))),
            updated_at: record.updated_at.as_deref().and_then(parse_timestamp),
        })
    }
}

/// First non-empty of: explicit name, sender name of the first inbound
/// message, participant identifier, then [`FALLBACK_NAME`].
pub fn resolve_participant_name(explicit: Option<&str>, messages: &[MessageRecord], identifier: &str) -> String {
    non_empty(explicit)
        .or_else(|| {
            messages
                .iter()
                .find(|m| m.is_inbound())
                .and_then(|m| non_empty(m.sender_name.as_deref()))
        })
        .or_else(|| non_empty(Some(identifier)))
        .unwrap_or(FALLBACK_NAME)
        .to_string()
}

/// Display time relative to `now`: `HH:MM` inside 24h, [`YESTERDAY`] inside
/// 48h, otherwise `DD Mon`.
pub fn format_relative<Tz>(ts: DateTime<Utc>, now: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let age = now.signed_duration_since(ts);
    let local = ts.with_timezone(tz);
    if age.num_hours() < 24 {
        local.format("%H:%M").to_string()
    } else if age.num_hours() < 48 {
        YESTERDAY.to_string()
    } else {
        local.format("%d %b").to_string()
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}
