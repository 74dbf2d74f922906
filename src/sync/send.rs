//! Outbound send pipeline.
//!
//! [`SendPipeline::begin`] validates and writes the optimistic entry
//! synchronously; the returned [`Dispatch`] is the network half and can be
//! spawned. Its [`Settled`] result goes back through the store with
//! [`Store::settle_send`].

use std::sync::Arc;

use log::{info, warn};

use crate::api::adapter::{Adapters, ChannelAdapter};
use crate::api::audit::{AuditSink, message_sent_entry};
use crate::api::models::{HistoryEntry, SendMessageRequest};
use crate::app::Session;
use crate::error::SendError;
use crate::store::{PendingEntry, SendOutcome, Store};

pub const DEFAULT_KIND: &str = "text";

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub conversation_id: String,
    pub text: String,
    /// Proxy message type; `text` when absent.
    pub kind: Option<String>,
}

impl OutboundMessage {
    pub fn text(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { conversation_id: conversation_id.into(), text: text.into(), kind: None }
    }
}

#[derive(Clone)]
pub struct SendPipeline {
    adapters: Adapters,
    audit: Arc<dyn AuditSink>,
    session: Session,
}

/// Network half of a send, detached from the store.
pub struct Dispatch {
    pending: PendingEntry,
    adapter: Arc<dyn ChannelAdapter>,
    request: SendMessageRequest,
    audit: Arc<dyn AuditSink>,
    audit_entry: HistoryEntry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settled {
    pub pending: PendingEntry,
    pub outcome: SendOutcome,
    /// Adapter error text, shown to the operator as a dismissible notice.
    pub error: Option<String>,
}

impl SendPipeline {
    pub fn new(adapters: Adapters, audit: Arc<dyn AuditSink>, session: Session) -> Self {
        Self { adapters, audit, session }
    }

    pub fn begin(&self, store: &mut Store, message: &OutboundMessage) -> Result<Dispatch, SendError> {
        if message.text.trim().is_empty() {
            return Err(SendError::EmptyText);
        }
        if message.conversation_id.trim().is_empty() {
            return Err(SendError::NoTarget);
        }
        let conversation = store
            .get(&message.conversation_id)
            .ok_or_else(|| SendError::UnknownConversation(message.conversation_id.clone()))?;
        let adapter = self
            .adapters
            .get(conversation.platform)
            .ok_or(SendError::NoAdapter(conversation.platform))?;
        let to = conversation.participant_identifier.clone();
        let audit_entry = message_sent_entry(&self.session, &conversation.participant_name, conversation.platform);

        let pending = store.apply_optimistic_send(&message.conversation_id, &message.text)?;
        let request = SendMessageRequest {
            channel: adapter.platform().slug().to_string(),
            to,
            message: message.text.clone(),
            message_type: message.kind.clone().unwrap_or_else(|| DEFAULT_KIND.to_string()),
            media_url: None,
            client_message_id: Some(pending.client_key.clone()),
        };
        Ok(Dispatch { pending, adapter, request, audit: self.audit.clone(), audit_entry })
    }
}

impl Dispatch {
    pub fn pending(&self) -> &PendingEntry {
        &self.pending
    }

    pub fn request(&self) -> &SendMessageRequest {
        &self.request
    }

    pub async fn run(self) -> Settled {
        match self.adapter.send_message(&self.request).await {
            Ok(receipt) => {
                info!(
                    "sent message to conversation {} via {}",
                    self.pending.conversation_id, self.request.channel
                );
                self.audit.record(self.audit_entry);
                Settled {
                    pending: self.pending,
                    outcome: SendOutcome::Accepted(receipt.backend_id()),
                    error: None,
                }
            }
            Err(e) => {
                warn!("send to conversation {} failed: {e}", self.pending.conversation_id);
                Settled { pending: self.pending, outcome: SendOutcome::Failed, error: Some(e.to_string()) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::Mapper;
    use crate::model::{Delivery, Platform, Sender};
    use crate::sync::fake::{FakeAdapter, RecordingAudit};
    use serde_json::json;

    fn setup(adapter: Arc<FakeAdapter>) -> (SendPipeline, Arc<RecordingAudit>, Store) {
        let audit = Arc::new(RecordingAudit::default());
        let session = Session { user: "Marta".into(), token: None };
        let pipeline = SendPipeline::new(Adapters::new().with(adapter), audit.clone(), session);
        let mut store = Store::new(Mapper::default());
        store.apply_full_refresh(Mapper::default().map_batch(&[json!({
            "id": 7, "channel_id": 1, "participant_name": "Ana", "participant_identifier": "+54911",
            "messages": [{"id": 1, "content": "hola", "direction": "inbound", "is_read": false}]
        })]));
        (pipeline, audit, store)
    }

    #[tokio::test]
    async fn optimistic_entry_is_visible_before_the_call_resolves() {
        let adapter = Arc::new(FakeAdapter::new(Platform::Whatsapp));
        adapter.send_returns(Ok(Some("55".into())));
        let (pipeline, audit, mut store) = setup(adapter.clone());

        let dispatch = pipeline.begin(&mut store, &OutboundMessage::text("7", "Hola")).unwrap();
        let c = store.get("7").unwrap();
        assert_eq!(c.messages.len(), 2);
        assert_eq!(c.messages[1].delivery, Delivery::Pending);
        assert!(adapter.sent().is_empty());

        let request = dispatch.request().clone();
        assert_eq!(request.channel, "whatsapp");
        assert_eq!(request.to, "+54911");
        assert_eq!(request.message_type, "text");
        assert_eq!(request.client_message_id.as_deref(), Some(dispatch.pending().client_key.as_str()));

        let settled = dispatch.run().await;
        assert_eq!(settled.outcome, SendOutcome::Accepted(Some(55)));
        assert!(store.settle_send(&settled.pending, settled.outcome, true));
        let last = store.get("7").unwrap().messages.last().unwrap().clone();
        assert_eq!(last.message_id, Some(55));
        assert_eq!(last.delivery, Delivery::Confirmed);

        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user, "Marta");
        assert_eq!(entries[0].details, "Respondió a Ana vía whatsapp");
    }

    #[tokio::test]
    async fn rejected_send_keeps_the_message_and_skips_audit() {
        let adapter = Arc::new(FakeAdapter::new(Platform::Whatsapp));
        adapter.send_returns(Err("proxy down".into()));
        let (pipeline, audit, mut store) = setup(adapter);

        let dispatch = pipeline.begin(&mut store, &OutboundMessage::text("7", "Hola")).unwrap();
        let settled = dispatch.run().await;
        assert_eq!(settled.outcome, SendOutcome::Failed);
        assert!(settled.error.as_deref().is_some_and(|e| e.contains("proxy down")));
        store.settle_send(&settled.pending, settled.outcome, true);

        let c = store.get("7").unwrap();
        let last = c.messages.last().unwrap();
        assert_eq!((last.text.as_str(), last.sender, last.delivery), ("Hola", Sender::Me, Delivery::Failed));
        assert!(audit.entries().is_empty());
    }

    #[test]
    fn preflight_rejections_touch_nothing() {
        let adapter = Arc::new(FakeAdapter::new(Platform::Whatsapp));
        let (pipeline, _audit, mut store) = setup(adapter);
        let before = store.get("7").unwrap().messages.len();

        let cases = [
            (OutboundMessage::text("7", "   "), SendError::EmptyText),
            (OutboundMessage::text("", "Hola"), SendError::NoTarget),
            (OutboundMessage::text("404", "Hola"), SendError::UnknownConversation("404".into())),
        ];
        for (message, expected) in cases {
            assert_eq!(pipeline.begin(&mut store, &message).err(), Some(expected));
        }
        assert_eq!(store.get("7").unwrap().messages.len(), before);
    }

    #[test]
    fn platform_without_adapter_is_rejected() {
        let adapter = Arc::new(FakeAdapter::new(Platform::Gmail));
        let (pipeline, _audit, mut store) = setup(adapter);
        let err = pipeline.begin(&mut store, &OutboundMessage::text("7", "Hola")).err();
        assert_eq!(err, Some(SendError::NoAdapter(Platform::Whatsapp)));
        assert_eq!(store.get("7").unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn kind_is_forwarded() {
        let adapter = Arc::new(FakeAdapter::new(Platform::Whatsapp));
        let (pipeline, _audit, mut store) = setup(adapter.clone());
        let message = OutboundMessage { kind: Some("template".into()), ..OutboundMessage::text("7", "Hola") };
        pipeline.begin(&mut store, &message).unwrap().run().await;
        assert_eq!(adapter.sent()[0].message_type, "template");
    }
}
