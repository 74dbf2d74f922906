//! The inbox loop.
//!
//! [`Inbox`] owns the [`Store`] and is the only writer. Commands from
//! [`InboxHandle`], live events, poll ticks and finished network tasks all
//! arrive on channels and are handled one at a time inside a single
//! `select!` loop. Network calls run on spawned tasks and report back over
//! the results channel, so the loop never waits on I/O.

pub mod poller;
pub mod send;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::api::adapter::Adapters;
use crate::api::audit::AuditSink;
use crate::api::events::LiveEvent;
use crate::api::live::{ConnectionState, Connector, LiveChannel};
use crate::api::models::ListQuery;
use crate::app::Config;
use crate::error::{ApiError, ConfigError, SendError};
use crate::mapper::Mapper;
use crate::model::{Category, Conversation, Platform};
use crate::store::{PendingEntry, Store};

use self::poller::Poller;
use self::send::{OutboundMessage, SendPipeline, Settled};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Dismissible, non-blocking feedback for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Broadcast(String),
    SendFailed { conversation_id: String, error: String },
    RefreshFailed(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Broadcast(text) => write!(f, "{text}"),
            Notice::SendFailed { conversation_id, error } => {
                write!(f, "message to conversation {conversation_id} was not sent: {error}")
            }
            Notice::RefreshFailed(reason) => write!(f, "refresh failed: {reason}"),
        }
    }
}

/// What the UI renders from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub conversations: Vec<Conversation>,
    pub selected: Option<String>,
    pub connected: bool,
    pub loading: bool,
    pub notice: Option<Notice>,
}

impl Snapshot {
    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn selected_conversation(&self) -> Option<&Conversation> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }
}

enum Command {
    Select(Option<String>),
    Send(OutboundMessage, oneshot::Sender<Result<PendingEntry, SendError>>),
    SetCategory(String, Category),
    SetVisible(bool),
    RefreshNow,
    DismissNotice,
    Shutdown,
}

/// Cloneable front end of a running [`Inbox`].
#[derive(Clone)]
pub struct InboxHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<Snapshot>,
}

impl InboxHandle {
    pub fn select(&self, id: Option<&str>) {
        self.command(Command::Select(id.map(str::to_string)));
    }

    /// Resolves as soon as the optimistic entry is in the store; the
    /// network call finishes in the background.
    pub async fn send(&self, message: OutboundMessage) -> Result<PendingEntry, SendError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send(message, reply))
            .map_err(|_| SendError::Closed)?;
        rx.await.map_err(|_| SendError::Closed)?
    }

    pub fn set_category(&self, conversation_id: &str, category: Category) {
        self.command(Command::SetCategory(conversation_id.to_string(), category));
    }

    pub fn set_visible(&self, visible: bool) {
        self.command(Command::SetVisible(visible));
    }

    pub fn refresh_now(&self) {
        self.command(Command::RefreshNow);
    }

    pub fn dismiss_notice(&self) {
        self.command(Command::DismissNotice);
    }

    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("inbox is gone, command ignored");
        }
    }
}

struct RefreshOutcome {
    lists: Vec<(Platform, Result<Vec<Value>, ApiError>)>,
    focused: Option<(String, Result<Value, ApiError>)>,
}

enum TaskResult {
    Refreshed(RefreshOutcome),
    Detail { conversation_id: String, result: Result<Value, ApiError> },
    SendSettled(Settled),
    MarkedRead(Vec<i64>),
}

enum Step {
    Command(Command),
    Live(LiveEvent),
    Connection,
    Tick,
    Task(TaskResult),
}

pub struct Inbox {
    store: Store,
    adapters: Adapters,
    pipeline: SendPipeline,
    live: LiveChannel,
    live_state: watch::Receiver<ConnectionState>,
    live_events: mpsc::UnboundedReceiver<LiveEvent>,
    poller: Poller,
    ticks: mpsc::UnboundedReceiver<()>,
    commands: mpsc::UnboundedReceiver<Command>,
    results_tx: mpsc::UnboundedSender<TaskResult>,
    results: mpsc::UnboundedReceiver<TaskResult>,
    snapshot: watch::Sender<Snapshot>,
    page_size: u32,
    refreshes_in_flight: usize,
    notice: Option<Notice>,
}

impl Inbox {
    /// Wires the inbox together. Spawns the live supervisor and the poller,
    /// so it must be called inside a tokio runtime; nothing touches the
    /// network until [`run`](Self::run).
    pub fn new(
        config: &Config,
        adapters: Adapters,
        audit: Arc<dyn AuditSink>,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, InboxHandle), ConfigError> {
        config.validate()?;
        let live_url = config.live_url()?;

        let (events_tx, live_events) = mpsc::unbounded_channel();
        let live = LiveChannel::spawn(live_url, &config.live, connector, events_tx);
        let (ticks_tx, ticks) = mpsc::unbounded_channel();
        let poller = Poller::spawn(config.polling.interval(), true, ticks_tx);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (results_tx, results) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());

        let inbox = Self {
            store: Store::new(Mapper::new(config.channels.clone())),
            pipeline: SendPipeline::new(adapters.clone(), audit, config.session.clone()),
            adapters,
            live_state: live.subscribe(),
            live,
            live_events,
            poller,
            ticks,
            commands,
            results_tx,
            results,
            snapshot: snapshot_tx,
            page_size: config.api.page_size,
            refreshes_in_flight: 0,
            notice: None,
        };
        let handle = InboxHandle { commands: commands_tx, snapshot: snapshot_rx };
        Ok((inbox, handle))
    }

    /// Runs until [`InboxHandle::shutdown`] or until every handle is dropped.
    pub async fn run(mut self) {
        self.live.connect();
        self.start_refresh();
        self.publish();

        loop {
            let step = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => Step::Command(Command::Shutdown),
                },
                Some(event) = self.live_events.recv() => Step::Live(event),
                Ok(()) = self.live_state.changed() => Step::Connection,
                Some(()) = self.ticks.recv() => Step::Tick,
                Some(result) = self.results.recv() => Step::Task(result),
            };
            match step {
                Step::Command(Command::Shutdown) => break,
                Step::Command(Command::Send(message, reply)) => {
                    let result = self.begin_send(&message);
                    // Publish first so the caller sees the entry once `send` returns.
                    self.publish();
                    let _ = reply.send(result);
                    continue;
                }
                Step::Command(command) => self.handle_command(command),
                Step::Live(event) => self.handle_live_event(event),
                Step::Connection => {
                    let state = *self.live_state.borrow_and_update();
                    debug!("live channel is {state:?}");
                }
                Step::Tick => self.start_refresh(),
                Step::Task(result) => self.handle_result(result),
            }
            self.publish();
        }

        self.shutdown().await;
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Select(id) => self.select(id.as_deref()),
            Command::SetCategory(id, category) => {
                if !self.store.set_category(&id, category) {
                    debug!("category of {id} unchanged");
                }
            }
            Command::SetVisible(visible) => self.poller.set_visible(visible),
            Command::RefreshNow => self.start_refresh(),
            Command::DismissNotice => self.notice = None,
            Command::Send(..) | Command::Shutdown => {}
        }
    }

    fn handle_live_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::Broadcast(text) => {
                info!("broadcast: {text}");
                self.notice = Some(Notice::Broadcast(text));
            }
            event => {
                self.store.apply_live_event(event);
            }
        }
    }

    fn handle_result(&mut self, result: TaskResult) {
        match result {
            TaskResult::Refreshed(outcome) => self.apply_refresh(outcome),
            TaskResult::Detail { conversation_id, result } => self.apply_detail(&conversation_id, result),
            TaskResult::SendSettled(settled) => {
                let connected = *self.live_state.borrow() == ConnectionState::Connected;
                self.store.settle_send(&settled.pending, settled.outcome, connected);
                if let Some(error) = settled.error {
                    self.notice = Some(Notice::SendFailed {
                        conversation_id: settled.pending.conversation_id,
                        error,
                    });
                }
            }
            TaskResult::MarkedRead(ids) => {
                for id in ids {
                    self.store.mark_read(id);
                }
            }
        }
    }

    fn begin_send(&mut self, message: &OutboundMessage) -> Result<PendingEntry, SendError> {
        let dispatch = self.pipeline.begin(&mut self.store, message).inspect_err(|e| {
            debug!("send rejected before dispatch: {e}");
        })?;
        let pending = dispatch.pending().clone();
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let settled = dispatch.run().await;
            let _ = results.send(TaskResult::SendSettled(settled));
        });
        Ok(pending)
    }

    fn select(&mut self, id: Option<&str>) {
        let Some(selection) = self.store.select(id) else {
            if let Some(id) = id {
                debug!("cannot select unknown conversation {id}");
            }
            return;
        };
        if selection.needs_fetch {
            self.fetch_detail(&selection.conversation_id, selection.platform);
        }
        self.mark_read(selection.platform, selection.unread_inbound);
    }

    fn fetch_detail(&self, conversation_id: &str, platform: Platform) {
        let Some(adapter) = self.adapters.get(platform) else {
            warn!("no adapter for {platform}, cannot load conversation {conversation_id}");
            return;
        };
        let Ok(backend_id) = conversation_id.parse::<i64>() else {
            warn!("conversation id {conversation_id} is not numeric");
            return;
        };
        let conversation_id = conversation_id.to_string();
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let result = adapter.get_conversation(backend_id).await;
            let _ = results.send(TaskResult::Detail { conversation_id, result });
        });
    }

    /// Marks through the adapter when the platform has read receipts,
    /// otherwise only locally.
    fn mark_read(&mut self, platform: Platform, ids: Vec<i64>) {
        if ids.is_empty() {
            return;
        }
        let adapter = self.adapters.get(platform).filter(|a| a.supports_read_receipts());
        let Some(adapter) = adapter else {
            for id in ids {
                self.store.mark_read(id);
            }
            return;
        };
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let mut marked = Vec::with_capacity(ids.len());
            for id in ids {
                match adapter.mark_read(id).await {
                    Ok(()) => marked.push(id),
                    Err(e) => warn!("could not mark message {id} read: {e}"),
                }
            }
            let _ = results.send(TaskResult::MarkedRead(marked));
        });
    }

    fn start_refresh(&mut self) {
        self.refreshes_in_flight += 1;
        let adapters = self.adapters.all();
        let query = ListQuery { limit: self.page_size, offset: 0 };
        let focused = self.store.selected().and_then(|c| {
            let backend_id = c.id.parse::<i64>().ok()?;
            let adapter = self.adapters.get(c.platform)?;
            Some((c.id.clone(), backend_id, adapter))
        });
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let lists = join_all(adapters.iter().map(|adapter| async move {
                (adapter.platform(), adapter.list_conversations(query).await)
            }))
            .await;
            let focused = match focused {
                Some((id, backend_id, adapter)) => Some((id, adapter.get_conversation(backend_id).await)),
                None => None,
            };
            let _ = results.send(TaskResult::Refreshed(RefreshOutcome { lists, focused }));
        });
    }

    /// Platforms whose list call failed keep the conversations they had.
    /// When every platform failed the store is left alone.
    fn apply_refresh(&mut self, outcome: RefreshOutcome) {
        self.refreshes_in_flight = self.refreshes_in_flight.saturating_sub(1);
        let total = outcome.lists.len();
        let mut fresh = Vec::new();
        let mut failed = 0;
        for (platform, result) in outcome.lists {
            match result {
                Ok(raws) => fresh.extend(self.store.mapper().map_batch(&raws)),
                Err(e) => {
                    warn!("refresh of {platform} failed: {e}");
                    failed += 1;
                    fresh.extend(self.store.conversations_for(platform).cloned());
                }
            }
        }
        if total > 0 && failed == total {
            self.notice = Some(Notice::RefreshFailed("no channel proxy could be reached".into()));
        } else {
            self.store.apply_full_refresh(fresh);
            if matches!(self.notice, Some(Notice::RefreshFailed(_))) {
                self.notice = None;
            }
        }
        if let Some((conversation_id, result)) = outcome.focused {
            self.apply_detail(&conversation_id, result);
        }
    }

    fn apply_detail(&mut self, conversation_id: &str, result: Result<Value, ApiError>) {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                warn!("could not load conversation {conversation_id}: {e}");
                return;
            }
        };
        let conversation = match self.store.mapper().map_conversation(&raw) {
            Ok(c) => c,
            Err(e) => {
                warn!("dropping detail of conversation {conversation_id}: {e}");
                return;
            }
        };
        self.store.apply_conversation_detail(conversation);
        if let Some(c) = self.store.selected().filter(|c| c.id == conversation_id) {
            let (platform, unread) = (c.platform, c.unread_inbound_ids());
            self.mark_read(platform, unread);
        }
    }

    fn publish(&self) {
        let next = Snapshot {
            conversations: self.store.conversations().to_vec(),
            selected: self.store.selected_id().map(str::to_string),
            connected: *self.live_state.borrow() == ConnectionState::Connected,
            loading: self.refreshes_in_flight > 0,
            notice: self.notice.clone(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    async fn shutdown(self) {
        info!("inbox shutting down");
        self.poller.stop();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.live.shutdown()).await.is_err() {
            warn!("live channel did not close within {}s", SHUTDOWN_GRACE.as_secs());
        }
        self.snapshot.send_modify(|s| {
            s.connected = false;
            s.loading = false;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::live::Frame;
    use crate::model::{Delivery, Sender};
    use crate::sync::fake::{FakeAdapter, FrameConnector, RecordingAudit};
    use serde_json::json;
    use tokio::task::JoinHandle;

    struct Harness {
        handle: InboxHandle,
        whatsapp: Arc<FakeAdapter>,
        gmail: Arc<FakeAdapter>,
        frames: mpsc::UnboundedSender<Frame>,
        connector: Arc<FrameConnector>,
        task: JoinHandle<()>,
    }

    fn conversation(id: i64, channel_id: i64, name: &str) -> Value {
        json!({"id": id, "channel_id": channel_id, "participant_name": name, "participant_identifier": format!("id-{id}")})
    }

    fn start(whatsapp: Vec<Value>, gmail: Vec<Value>) -> Harness {
        let wa = Arc::new(FakeAdapter::new(Platform::Whatsapp));
        wa.list_returns(Ok(whatsapp));
        let gm = Arc::new(FakeAdapter::new(Platform::Gmail));
        gm.list_returns(Ok(gmail));
        let adapters = Adapters::new().with(wa.clone()).with(gm.clone());
        let (connector, frames) = FrameConnector::new();
        let connector = Arc::new(connector);
        let (inbox, handle) =
            Inbox::new(&Config::default(), adapters, Arc::new(RecordingAudit::default()), connector.clone()).unwrap();
        let task = tokio::spawn(inbox.run());
        Harness { handle, whatsapp: wa, gmail: gm, frames, connector, task }
    }

    async fn wait_for(handle: &InboxHandle, pred: impl FnMut(&Snapshot) -> bool) -> Snapshot {
        let mut rx = handle.subscribe();
        let waited = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred)).await;
        waited.expect("snapshot condition not reached").expect("inbox gone").clone()
    }

    fn ids(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.conversations.iter().map(|c| c.id.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn initial_refresh_fills_the_list_and_connects() {
        let h = start(vec![conversation(7, 1, "Ana")], vec![conversation(9, 3, "Luis")]);
        let snap = wait_for(&h.handle, |s| s.conversations.len() == 2 && s.connected && !s.loading).await;
        assert_eq!(ids(&snap), vec!["7", "9"]);
        assert_eq!(snap.get("9").unwrap().platform, Platform::Gmail);
        assert_eq!(snap.notice, None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_platform_keeps_its_conversations() {
        let h = start(vec![conversation(7, 1, "Ana")], vec![conversation(9, 3, "Luis")]);
        wait_for(&h.handle, |s| s.conversations.len() == 2).await;

        h.gmail.list_returns(Err("gmail proxy down".into()));
        h.whatsapp.list_returns(Ok(vec![conversation(7, 1, "Ana"), conversation(10, 1, "Beto")]));
        h.handle.refresh_now();
        let snap = wait_for(&h.handle, |s| s.get("10").is_some() && !s.loading).await;
        assert_eq!(ids(&snap), vec!["7", "10", "9"]);
        assert_eq!(snap.notice, None);
    }

    #[tokio::test(start_paused = true)]
    async fn all_platforms_failing_leaves_store_and_raises_notice() {
        let h = start(vec![conversation(7, 1, "Ana")], vec![]);
        wait_for(&h.handle, |s| s.conversations.len() == 1 && !s.loading).await;

        h.whatsapp.list_returns(Err("down".into()));
        h.gmail.list_returns(Err("down".into()));
        h.handle.refresh_now();
        let snap = wait_for(&h.handle, |s| s.notice.is_some()).await;
        assert!(matches!(snap.notice, Some(Notice::RefreshFailed(_))));
        assert_eq!(ids(&snap), vec!["7"]);

        h.handle.dismiss_notice();
        wait_for(&h.handle, |s| s.notice.is_none()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn selecting_loads_messages_and_marks_them_read() {
        let h = start(vec![conversation(7, 1, "Ana")], vec![]);
        h.whatsapp.detail_returns(
            7,
            json!({
                "id": 7, "channel_id": 1, "participant_name": "Ana",
                "messages": [
                    {"id": 2, "content": "sigo esperando", "direction": "inbound", "is_read": false},
                    {"id": 1, "content": "hola", "direction": "inbound", "is_read": false}
                ]
            }),
        );
        wait_for(&h.handle, |s| s.conversations.len() == 1).await;

        h.handle.select(Some("7"));
        let snap = wait_for(&h.handle, |s| {
            s.selected_conversation().is_some_and(|c| c.messages.len() == 2 && !c.unread)
        })
        .await;
        assert_eq!(snap.selected.as_deref(), Some("7"));
        assert_eq!(h.whatsapp.detail_calls(), vec![7]);
        assert_eq!(h.whatsapp.marked(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn platform_without_receipts_is_marked_locally() {
        let h = start(vec![], vec![conversation(9, 3, "Luis")]);
        h.gmail.detail_returns(
            9,
            json!({"id": 9, "channel_id": 3, "messages": [{"id": 5, "content": "asunto", "direction": "inbound", "is_read": false}]}),
        );
        wait_for(&h.handle, |s| s.conversations.len() == 1).await;

        h.handle.select(Some("9"));
        wait_for(&h.handle, |s| s.get("9").is_some_and(|c| c.messages.len() == 1 && !c.unread)).await;
        assert!(h.gmail.marked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn send_resolves_before_the_network_call() {
        let h = start(vec![conversation(7, 1, "Ana")], vec![]);
        wait_for(&h.handle, |s| s.conversations.len() == 1 && s.connected).await;
        let gate = h.whatsapp.hold_sends();
        h.whatsapp.send_returns(Ok(Some("40".into())));

        let pending = h.handle.send(OutboundMessage::text("7", "Hola")).await.unwrap();
        assert_eq!(pending.conversation_id, "7");
        let snap = h.handle.snapshot();
        let last = snap.get("7").unwrap().messages.last().unwrap();
        assert_eq!((last.text.as_str(), last.delivery), ("Hola", Delivery::Pending));
        assert!(h.whatsapp.sent().is_empty());

        gate.notify_one();
        let snap = wait_for(&h.handle, |s| {
            s.get("7").and_then(|c| c.messages.last()).is_some_and(|m| m.message_id == Some(40))
        })
        .await;
        assert_eq!(snap.get("7").unwrap().messages.len(), 1);
        assert_eq!(h.whatsapp.sent()[0].to, "id-7");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_stays_visible_with_a_notice() {
        let h = start(vec![conversation(7, 1, "Ana")], vec![]);
        wait_for(&h.handle, |s| s.conversations.len() == 1).await;
        h.whatsapp.send_returns(Err("rate limited".into()));

        h.handle.send(OutboundMessage::text("7", "Hola")).await.unwrap();
        let snap = wait_for(&h.handle, |s| s.notice.is_some()).await;
        assert!(matches!(&snap.notice, Some(Notice::SendFailed { conversation_id, .. }) if conversation_id == "7"));
        let last = snap.get("7").unwrap().messages.last().unwrap();
        assert_eq!((last.sender, last.delivery), (Sender::Me, Delivery::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn send_rejections_come_back_to_the_caller() {
        let h = start(vec![conversation(7, 1, "Ana")], vec![]);
        wait_for(&h.handle, |s| s.conversations.len() == 1).await;
        assert_eq!(h.handle.send(OutboundMessage::text("7", "  ")).await, Err(SendError::EmptyText));
        assert_eq!(h.handle.send(OutboundMessage::text("", "Hola")).await, Err(SendError::NoTarget));
        assert!(h.handle.snapshot().get("7").unwrap().messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn live_events_reach_the_store() {
        let h = start(vec![conversation(7, 1, "Ana")], vec![]);
        wait_for(&h.handle, |s| s.conversations.len() == 1 && s.connected).await;

        let event = r#"{"type":"new_message","data":{"id":12,"content":"hola","direction":"inbound","conversation_id":7,"is_read":false}}"#;
        h.frames.send(Frame::Text(event.into())).unwrap();
        h.frames.send(Frame::Text(event.into())).unwrap();
        h.frames.send(Frame::Text(r#"{"type":"broadcast","data":{"message":"mantenimiento"}}"#.into())).unwrap();

        let snap = wait_for(&h.handle, |s| s.notice.is_some()).await;
        assert_eq!(snap.notice, Some(Notice::Broadcast("mantenimiento".into())));
        let c = snap.get("7").unwrap();
        assert_eq!(c.messages.len(), 1);
        assert!(c.unread);
        assert_eq!(c.last_message.as_deref(), Some("hola"));
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_inbox_does_not_poll() {
        let h = start(vec![conversation(7, 1, "Ana")], vec![]);
        wait_for(&h.handle, |s| s.conversations.len() == 1 && !s.loading).await;

        h.handle.set_visible(false);
        h.whatsapp.list_returns(Ok(vec![conversation(7, 1, "Ana"), conversation(8, 1, "Caro")]));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(h.handle.snapshot().get("8").is_none());

        h.handle.set_visible(true);
        wait_for(&h.handle, |s| s.get("8").is_some()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn polling_picks_up_new_conversations() {
        let h = start(vec![conversation(7, 1, "Ana")], vec![]);
        wait_for(&h.handle, |s| s.conversations.len() == 1 && !s.loading).await;
        h.whatsapp.list_returns(Ok(vec![conversation(7, 1, "Ana"), conversation(8, 1, "Caro")]));
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(h.handle.snapshot().get("8").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_disconnects_and_closes_the_handle() {
        let h = start(vec![conversation(7, 1, "Ana")], vec![]);
        wait_for(&h.handle, |s| s.connected).await;

        h.handle.shutdown();
        h.task.await.unwrap();
        assert!(h.connector.closed());
        assert!(!h.handle.snapshot().connected);
        assert_eq!(h.handle.send(OutboundMessage::text("7", "Hola")).await, Err(SendError::Closed));
    }
}
