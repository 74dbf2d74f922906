//! Per-platform REST proxies behind one interface.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::client::{ApiClient, records_from};
use crate::api::models::{ListQuery, SendMessageRequest, SendMessageResponse};
use crate::error::ApiError;
use crate::model::Platform;

/// What the adapter reports back for an accepted send.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SendReceipt {
    /// Server-side id as returned by the proxy; may not be numeric.
    pub server_id: Option<String>,
}

impl SendReceipt {
    /// Backend numeric identity, when the proxy returned one.
    pub fn backend_id(&self) -> Option<i64> {
        self.server_id.as_deref().and_then(|s| s.trim().parse().ok())
    }
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    fn supports_read_receipts(&self) -> bool {
        self.platform().supports_read_receipts()
    }

    /// One page of conversation records, without embedded messages.
    async fn list_conversations(&self, query: ListQuery) -> Result<Vec<Value>, ApiError>;

    /// A single conversation record with its (unordered) messages.
    async fn get_conversation(&self, id: i64) -> Result<Value, ApiError>;

    async fn send_message(&self, request: &SendMessageRequest) -> Result<SendReceipt, ApiError>;

    async fn mark_read(&self, message_id: i64) -> Result<(), ApiError>;
}

/// REST proxy for one platform under `/api/v1/{platform}/...`.
#[derive(Debug, Clone)]
pub struct RestAdapter {
    client: ApiClient,
    platform: Platform,
}

impl RestAdapter {
    pub fn new(client: ApiClient, platform: Platform) -> Self {
        Self { client, platform }
    }

    fn path(&self, suffix: &str) -> String {
        format!("/api/v1/{}/{}", self.platform.slug(), suffix)
    }
}

#[async_trait]
impl ChannelAdapter for RestAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn list_conversations(&self, query: ListQuery) -> Result<Vec<Value>, ApiError> {
        let req = self
            .client
            .get(&self.path("conversations"))
            .query(&[("limit", query.limit), ("offset", query.offset)]);
        let json: Value = self.client.send_json(req).await?;
        records_from(json)
    }

    async fn get_conversation(&self, id: i64) -> Result<Value, ApiError> {
        let req = self.client.get(&self.path(&format!("conversations/{}", id)));
        self.client.send_json(req).await
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<SendReceipt, ApiError> {
        let req = self.client.post(&self.path("send")).json(request);
        let resp: SendMessageResponse = self.client.send_json(req).await?;
        if !resp.success {
            return Err(ApiError::Rejected(resp.error.unwrap_or_else(|| "Error al enviar mensaje".into())));
        }
        Ok(SendReceipt { server_id: resp.message_id })
    }

    async fn mark_read(&self, message_id: i64) -> Result<(), ApiError> {
        if !self.supports_read_receipts() {
            return Err(ApiError::Unsupported { platform: self.platform, operation: "mark as read" });
        }
        let req = self.client.put(&self.path(&format!("messages/{}/read", message_id)));
        self.client.send_unit(req).await
    }
}

/// The adapter set, one per platform.
#[derive(Clone, Default)]
pub struct Adapters {
    by_platform: HashMap<Platform, Arc<dyn ChannelAdapter>>,
}

impl Adapters {
    pub fn new() -> Self {
        Self::default()
    }

    /// REST adapters for every platform sharing one client.
    pub fn rest(client: &ApiClient) -> Self {
        Platform::ALL.into_iter().fold(Self::new(), |set, p| {
            set.with(Arc::new(RestAdapter::new(client.clone(), p)))
        })
    }

    pub fn with(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.by_platform.insert(adapter.platform(), adapter);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn ChannelAdapter>> {
        self.by_platform.get(&platform).cloned()
    }

    /// Adapters in a stable platform order.
    pub fn all(&self) -> Vec<Arc<dyn ChannelAdapter>> {
        Platform::ALL.into_iter().filter_map(|p| self.get(p)).collect()
    }
}
