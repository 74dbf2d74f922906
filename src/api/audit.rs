use log::{debug, warn};

use crate::api::client::ApiClient;
use crate::api::models::HistoryEntry;
use crate::app::Session;
use crate::model::Platform;

const HISTORY_LOG_PATH: &str = "/api/v1/history/log";

/// Fire-and-forget action log. Implementations must never block or fail
/// the caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: HistoryEntry);
}

/// Builds the entry logged after a successful send.
pub fn message_sent_entry(session: &Session, to: &str, platform: Platform) -> HistoryEntry {
    let to = if to.trim().is_empty() { "contacto" } else { to };
    HistoryEntry {
        user: session.display_name().to_string(),
        action: "Envió mensaje".into(),
        action_type: "message".into(),
        details: format!("Respondió a {} vía {}", to, platform),
        endpoint: Some("/api/v1/messages".into()),
        method: "POST".into(),
    }
}

/// Posts entries to the history service on a detached task.
#[derive(Debug, Clone)]
pub struct RestAudit {
    client: ApiClient,
}

impl RestAudit {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn post(&self, entry: &HistoryEntry) -> Result<(), crate::error::ApiError> {
        let req = self.client.post(HISTORY_LOG_PATH).json(entry);
        self.client.send_unit(req).await
    }
}

impl AuditSink for RestAudit {
    fn record(&self, entry: HistoryEntry) {
        let this = self.clone();
        tokio::spawn(async move {
            match this.post(&entry).await {
                Ok(()) => debug!("audit entry recorded: {}", entry.action),
                Err(e) => warn!("could not record audit entry: {e}"),
            }
        });
    }
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAudit;

impl AuditSink for NoAudit {
    fn record(&self, _entry: HistoryEntry) {}
}
