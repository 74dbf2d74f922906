//! In-memory adapter and audit sink for exercising the sync layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use url::Url;

use crate::api::adapter::{ChannelAdapter, SendReceipt};
use crate::api::audit::AuditSink;
use crate::api::live::{Connector, Frame, Transport};
use crate::api::models::{HistoryEntry, ListQuery, SendMessageRequest};
use crate::error::{ApiError, LiveError};
use crate::model::Platform;

pub struct FakeAdapter {
    platform: Platform,
    conversations: Mutex<Result<Vec<Value>, String>>,
    details: Mutex<HashMap<i64, Value>>,
    send_result: Mutex<Result<Option<String>, String>>,
    send_gate: Mutex<Option<Arc<Notify>>>,
    sent: Mutex<Vec<SendMessageRequest>>,
    marked: Mutex<Vec<i64>>,
    detail_calls: Mutex<Vec<i64>>,
}

impl FakeAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            conversations: Mutex::new(Ok(Vec::new())),
            details: Mutex::new(HashMap::new()),
            send_result: Mutex::new(Ok(None)),
            send_gate: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            marked: Mutex::new(Vec::new()),
            detail_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn list_returns(&self, result: Result<Vec<Value>, String>) {
        *self.conversations.lock().unwrap() = result;
    }

    pub fn detail_returns(&self, id: i64, raw: Value) {
        self.details.lock().unwrap().insert(id, raw);
    }

    pub fn send_returns(&self, result: Result<Option<String>, String>) {
        *self.send_result.lock().unwrap() = result;
    }

    /// Holds every send until the returned gate is notified.
    pub fn hold_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.send_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn sent(&self) -> Vec<SendMessageRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn marked(&self) -> Vec<i64> {
        self.marked.lock().unwrap().clone()
    }

    pub fn detail_calls(&self) -> Vec<i64> {
        self.detail_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelAdapter for FakeAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn list_conversations(&self, _query: ListQuery) -> Result<Vec<Value>, ApiError> {
        self.conversations.lock().unwrap().clone().map_err(ApiError::Rejected)
    }

    async fn get_conversation(&self, id: i64) -> Result<Value, ApiError> {
        self.detail_calls.lock().unwrap().push(id);
        self.details
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::Status { status: 404, detail: "Conversación no encontrada".into() })
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<SendReceipt, ApiError> {
        let gate = self.send_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.sent.lock().unwrap().push(request.clone());
        let result = self.send_result.lock().unwrap().clone();
        result.map(|server_id| SendReceipt { server_id }).map_err(ApiError::Rejected)
    }

    async fn mark_read(&self, message_id: i64) -> Result<(), ApiError> {
        if !self.supports_read_receipts() {
            return Err(ApiError::Unsupported { platform: self.platform, operation: "mark_read" });
        }
        self.marked.lock().unwrap().push(message_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl RecordingAudit {
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAudit {
    fn record(&self, entry: HistoryEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

/// Connects once to a socket fed by the returned sender; later attempts
/// are refused.
pub struct FrameConnector {
    frames: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    closed: Arc<AtomicBool>,
}

impl FrameConnector {
    pub fn new() -> (Self, mpsc::UnboundedSender<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self { frames: Mutex::new(Some(rx)), closed: Arc::new(AtomicBool::new(false)) };
        (connector, tx)
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FrameTransport {
    frames: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connector for FrameConnector {
    async fn connect(&self, _url: &Url) -> Result<Box<dyn Transport>, LiveError> {
        let frames = self.frames.lock().unwrap().take();
        match frames {
            Some(frames) => Ok(Box::new(FrameTransport { frames, closed: self.closed.clone() })),
            None => Err(LiveError::Connect("refused".into())),
        }
    }
}

#[async_trait]
impl Transport for FrameTransport {
    async fn next_frame(&mut self) -> Frame {
        self.frames.recv().await.unwrap_or(Frame::Closed { clean: false })
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
