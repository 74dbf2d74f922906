//! In-memory authority for conversations and messages.
//!
//! Three producers feed it: full refreshes, live events and optimistic
//! sends. Every entry point is synchronous and runs to completion, so the
//! dedup/merge rules below are all the consistency the store needs.

use std::collections::{HashMap, HashSet};

use chrono::{Local, Utc};
use log::{debug, warn};
use uuid::Uuid;

use crate::api::events::LiveEvent;
use crate::error::SendError;
use crate::mapper::{ConversationPatch, Mapper, format_relative};
use crate::model::{Category, Conversation, Delivery, Message, Platform, Sender};

/// Result of an accepted optimistic insert.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub conversation_id: String,
    pub client_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Adapter accepted the message; carries the backend id when numeric.
    Accepted(Option<i64>),
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub conversation_id: String,
    pub platform: Platform,
    /// Message sequence is empty, so the caller should fetch the detail.
    pub needs_fetch: bool,
    pub unread_inbound: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub platform: Option<Platform>,
    pub category: Option<Category>,
    pub query: Option<String>,
}

impl Filter {
    pub fn matches(&self, c: &Conversation) -> bool {
        if self.platform.is_some_and(|p| p != c.platform) {
            return false;
        }
        if self.category.is_some_and(|cat| cat != c.category) {
            return false;
        }
        match self.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            None => true,
            Some(q) => {
                let q = q.to_lowercase();
                c.participant_name.to_lowercase().contains(&q)
                    || c.last_message.as_deref().is_some_and(|m| m.to_lowercase().contains(&q))
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Store {
    mapper: Mapper,
    conversations: Vec<Conversation>,
    selected: Option<String>,
}

impl Store {
    pub fn new(mapper: Mapper) -> Self {
        Self { mapper, conversations: Vec::new(), selected: None }
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected(&self) -> Option<&Conversation> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    pub fn filtered(&self, filter: &Filter) -> Vec<&Conversation> {
        self.conversations.iter().filter(|c| filter.matches(c)).collect()
    }

    pub fn conversations_for(&self, platform: Platform) -> impl Iterator<Item = &Conversation> {
        self.conversations.iter().filter(move |c| c.platform == platform)
    }

    /// Replaces the conversation list. Existence, order and mutable fields
    /// come from `fresh`; message sequences are merged so nothing already
    /// shown disappears.
    pub fn apply_full_refresh(&mut self, fresh: Vec<Conversation>) {
        let mut previous: HashMap<String, Conversation> =
            self.conversations.drain(..).map(|c| (c.id.clone(), c)).collect();
        let mut next: Vec<Conversation> = Vec::with_capacity(fresh.len());
        for conversation in fresh {
            if next.iter().any(|c| c.id == conversation.id) {
                warn!("refresh returned conversation {} twice, keeping the first", conversation.id);
                continue;
            }
            let merged = match previous.remove(&conversation.id) {
                Some(existing) => merge(existing, conversation),
                None => {
                    let mut c = conversation;
                    c.refresh_derived();
                    c
                }
            };
            next.push(merged);
        }
        if !previous.is_empty() {
            debug!("refresh dropped {} conversation(s)", previous.len());
        }
        self.conversations = next;
        if let Some(sel) = &self.selected {
            if self.get(sel).is_none() {
                self.selected = None;
            }
        }
    }

    /// Merges a freshly fetched single conversation. Unknown ids are ignored;
    /// only a full refresh creates conversations.
    pub fn apply_conversation_detail(&mut self, fresh: Conversation) -> bool {
        let Some(pos) = self.conversations.iter().position(|c| c.id == fresh.id) else {
            debug!("detail for unknown conversation {}, ignoring", fresh.id);
            return false;
        };
        let existing = self.conversations.remove(pos);
        self.conversations.insert(pos, merge(existing, fresh));
        true
    }

    /// Returns whether the store changed.
    pub fn apply_live_event(&mut self, event: LiveEvent) -> bool {
        match event {
            LiveEvent::NewMessage(record) => {
                let Some(conversation_id) = record.conversation_id else {
                    warn!("new_message without conversation_id, dropping");
                    return false;
                };
                let message = match self.mapper.map_message(&record) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("dropping new_message: {e}");
                        return false;
                    }
                };
                let Some(conversation) = self.get_mut(&conversation_id.to_string()) else {
                    debug!("new_message for unknown conversation {conversation_id}, next refresh will pick it up");
                    return false;
                };
                append_confirmed(conversation, message)
            }
            LiveEvent::MessageRead { message_id } => self.mark_read(message_id),
            LiveEvent::ConversationUpdated(raw) => match self.mapper.map_patch(&raw) {
                Ok(patch) => self.apply_patch(patch),
                Err(e) => {
                    warn!("dropping conversation_updated: {e}");
                    false
                }
            },
            LiveEvent::Broadcast(_) => false,
        }
    }

    fn apply_patch(&mut self, patch: ConversationPatch) -> bool {
        let Some(c) = self.get_mut(&patch.id) else {
            debug!("conversation_updated for unknown conversation {}", patch.id);
            return false;
        };
        if let Some(category) = patch.category {
            c.category = category;
        }
        if let Some(name) = patch.participant_name {
            c.participant_name = name;
        }
        if let Some(identifier) = patch.participant_identifier {
            c.participant_identifier = identifier;
        }
        if patch.updated_at.is_some() {
            c.updated_at = patch.updated_at;
        }
        true
    }

    /// Sets `is_read` on the message with this backend id, wherever it is.
    pub fn mark_read(&mut self, message_id: i64) -> bool {
        for c in &mut self.conversations {
            if let Some(m) = c.messages.iter_mut().find(|m| m.message_id == Some(message_id)) {
                if m.is_read {
                    return false;
                }
                m.is_read = true;
                c.refresh_derived();
                return true;
            }
        }
        false
    }

    pub fn set_category(&mut self, conversation_id: &str, category: Category) -> bool {
        match self.get_mut(conversation_id) {
            Some(c) if c.category != category => {
                c.category = category;
                true
            }
            _ => false,
        }
    }

    /// Appends an operator-authored message before the network call.
    pub fn apply_optimistic_send(&mut self, conversation_id: &str, text: &str) -> Result<PendingEntry, SendError> {
        if text.trim().is_empty() {
            return Err(SendError::EmptyText);
        }
        if conversation_id.trim().is_empty() {
            return Err(SendError::NoTarget);
        }
        let conversation = self
            .get_mut(conversation_id)
            .ok_or_else(|| SendError::UnknownConversation(conversation_id.to_string()))?;

        let key = Uuid::new_v4().to_string();
        let now = Utc::now();
        conversation.messages.push(Message {
            id: format!("local-{key}"),
            text: text.to_string(),
            sender: Sender::Me,
            time: format_relative(now, now, &Local),
            message_id: None,
            is_read: true,
            delivery: Delivery::Pending,
            client_key: Some(key.clone()),
        });
        conversation.refresh_derived();
        Ok(PendingEntry { conversation_id: conversation_id.to_string(), client_key: key })
    }

    /// Resolves an optimistic entry once the adapter call finished. The
    /// entry is never retracted: failures stay visible as `Failed`.
    pub fn settle_send(&mut self, pending: &PendingEntry, outcome: SendOutcome, connected: bool) -> bool {
        let Some(c) = self.get_mut(&pending.conversation_id) else {
            return false;
        };
        let Some(pos) = c
            .messages
            .iter()
            .position(|m| m.message_id.is_none() && m.client_key.as_deref() == Some(pending.client_key.as_str()))
        else {
            // Already confirmed by the server echo.
            return false;
        };
        match outcome {
            SendOutcome::Accepted(Some(id)) => {
                let mut m = c.messages.remove(pos);
                if !c.contains_message_id(id) {
                    m.id = id.to_string();
                    m.message_id = Some(id);
                    m.delivery = Delivery::Confirmed;
                    c.insert_ordered(m);
                }
            }
            // The echo will confirm it.
            SendOutcome::Accepted(None) if connected => return false,
            SendOutcome::Accepted(None) => c.messages[pos].delivery = Delivery::Sent,
            SendOutcome::Failed => c.messages[pos].delivery = Delivery::Failed,
        }
        c.refresh_derived();
        true
    }

    /// Points the selection at `id` (or clears it). Unknown ids leave the
    /// selection unchanged and return `None`.
    pub fn select(&mut self, id: Option<&str>) -> Option<Selection> {
        let Some(id) = id else {
            self.selected = None;
            return None;
        };
        let c = self.get(id)?;
        let selection = Selection {
            conversation_id: c.id.clone(),
            platform: c.platform,
            needs_fetch: c.messages.is_empty(),
            unread_inbound: c.unread_inbound_ids(),
        };
        self.selected = Some(selection.conversation_id.clone());
        Some(selection)
    }
}

/// Adds a confirmed message: no-op when its backend id is present; replaces
/// the optimistic entry it echoes, if any.
fn append_confirmed(c: &mut Conversation, message: Message) -> bool {
    let Some(id) = message.message_id else {
        return false;
    };
    if c.contains_message_id(id) {
        return false;
    }
    if message.sender == Sender::Me {
        if let Some(pos) = find_echoed(c, &message) {
            c.messages.remove(pos);
        }
    }
    c.insert_ordered(message);
    c.refresh_derived();
    true
}

/// Optimistic entry a server echo stands for: same client key when the echo
/// carries one, otherwise the oldest unfailed unconfirmed entry with the
/// same text.
fn find_echoed(c: &Conversation, echo: &Message) -> Option<usize> {
    let unconfirmed = |m: &&Message| m.message_id.is_none() && m.sender == Sender::Me;
    match echo.client_key.as_deref() {
        // A key nobody here minted belongs to another client.
        Some(key) => c.messages.iter().position(|m| unconfirmed(&m) && m.client_key.as_deref() == Some(key)),
        None => c.messages.iter().position(|m| unconfirmed(&m) && text_matchable(m) && m.text == echo.text),
    }
}

/// Failed entries were never delivered, so no server copy can stand for them.
fn text_matchable(pending: &Message) -> bool {
    pending.delivery != Delivery::Failed
}

fn merge(existing: Conversation, mut fresh: Conversation) -> Conversation {
    if !fresh.messages_loaded {
        fresh.messages = existing.messages;
        fresh.messages_loaded = existing.messages_loaded;
    } else {
        let known: HashSet<i64> = existing.messages.iter().filter_map(|m| m.message_id).collect();
        let mut claimed: HashSet<i64> = HashSet::new();
        // Unconfirmed entries to keep, each with the confirmed id it followed.
        let mut kept: Vec<(Option<i64>, Message)> = Vec::new();
        let mut anchor: Option<i64> = None;
        for old in existing.messages {
            match old.message_id {
                Some(id) => {
                    anchor = Some(id);
                    match fresh.messages.iter_mut().find(|m| m.message_id == Some(id)) {
                        // isRead only moves false -> true.
                        Some(m) => m.is_read |= old.is_read,
                        None => fresh.insert_ordered(old),
                    }
                }
                None if carries_pending(&fresh, &old) => {}
                None => match confirmed_copy(&fresh, &old, &known, &claimed) {
                    Some(id) => {
                        claimed.insert(id);
                    }
                    None => kept.push((anchor, old)),
                },
            }
        }
        for (anchor, pending) in kept {
            insert_after(&mut fresh, anchor, pending);
        }
    }
    if !fresh.category_reported {
        fresh.category = existing.category;
        fresh.category_reported = existing.category_reported;
    }
    fresh.refresh_derived();
    fresh
}

/// Puts an unconfirmed entry right after the confirmed message it followed
/// (the front when it followed none), behind entries already placed there.
fn insert_after(c: &mut Conversation, anchor: Option<i64>, pending: Message) {
    let mut pos = match anchor {
        Some(id) => c
            .messages
            .iter()
            .position(|m| m.message_id == Some(id))
            .map_or(c.messages.len(), |p| p + 1),
        None => 0,
    };
    while c.messages.get(pos).is_some_and(|m| m.message_id.is_none()) {
        pos += 1;
    }
    c.messages.insert(pos, pending);
}

/// `fresh` is a copy of the local state and already holds this entry.
fn carries_pending(fresh: &Conversation, pending: &Message) -> bool {
    pending.client_key.is_some()
        && fresh
            .messages
            .iter()
            .any(|m| m.message_id.is_none() && m.client_key == pending.client_key)
}

/// Backend id of the message in `fresh` that confirms an optimistic entry:
/// same client key, or a not-yet-known keyless outbound message with the
/// same text.
fn confirmed_copy(fresh: &Conversation, pending: &Message, known: &HashSet<i64>, claimed: &HashSet<i64>) -> Option<i64> {
    if let Some(key) = pending.client_key.as_deref() {
        if let Some((id, _)) = unclaimed_outbound(fresh, claimed).find(|(_, m)| m.client_key.as_deref() == Some(key)) {
            return Some(id);
        }
    }
    if !text_matchable(pending) {
        return None;
    }
    unclaimed_outbound(fresh, claimed)
        .find(|(id, m)| !known.contains(id) && m.client_key.is_none() && m.text == pending.text)
        .map(|(id, _)| id)
}

fn unclaimed_outbound<'a>(
    fresh: &'a Conversation,
    claimed: &'a HashSet<i64>,
) -> impl Iterator<Item = (i64, &'a Message)> + 'a {
    fresh
        .messages
        .iter()
        .filter(|m| m.sender == Sender::Me)
        .filter_map(move |m| m.message_id.filter(|id| !claimed.contains(id)).map(|id| (id, m)))
}
