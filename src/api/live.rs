//! Push connection to the live update channel.
//!
//! A supervisor task owns the single physical connection and walks
//! `Disconnected -> Connecting -> Connected -> Disconnected`, reconnecting
//! with exponential backoff after abnormal closes. Parsed events go out over
//! an mpsc channel in arrival order; nothing is buffered for replay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::api::events::LiveEvent;
use crate::app::LiveSettings;
use crate::error::LiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// `delay(n) = base * 2^(n-1)` for attempts `1..=max_attempts`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts, attempts: 0 }
    }

    /// Consumes one attempt from the budget; `None` once it is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        let factor = 1u32.checked_shl(self.attempts - 1).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn exhaust(&mut self) {
        self.attempts = self.max_attempts;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// `clean` is true only for a normal (1000) close.
    Closed { clean: bool },
}

#[async_trait]
pub trait Transport: Send {
    async fn next_frame(&mut self) -> Frame;
    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, LiveError>;
}

/// tokio-tungstenite backed connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, LiveError> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| LiveError::Connect(e.to_string()))?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn next_frame(&mut self) -> Frame {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Frame::Text(text),
                Some(Ok(WsMessage::Close(frame))) => {
                    let clean = frame.as_ref().is_some_and(|f| f.code == CloseCode::Normal);
                    return Frame::Closed { clean };
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("live channel read error: {e}");
                    return Frame::Closed { clean: false };
                }
                None => return Frame::Closed { clean: false },
            }
        }
    }

    async fn close(&mut self) {
        let frame = CloseFrame { code: CloseCode::Normal, reason: "Client disconnect".into() };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!("live channel close: {e}");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Connect,
    Disconnect,
    Reconnect,
}

/// Handle to the supervisor task. Dropping it stops the task.
pub struct LiveChannel {
    control: mpsc::UnboundedSender<Control>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl LiveChannel {
    pub fn spawn(
        url: Url,
        settings: &LiveSettings,
        connector: Arc<dyn Connector>,
        events: mpsc::UnboundedSender<LiveEvent>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let supervisor = Supervisor {
            url,
            connector,
            backoff: Backoff::new(settings.reconnect_base(), settings.max_reconnect_attempts),
            events,
            control: control_rx,
            state: state_tx,
        };
        let task = tokio::spawn(supervisor.run());
        Self { control: control_tx, state: state_rx, task }
    }

    /// No-op while connecting or connected.
    pub fn connect(&self) {
        let _ = self.control.send(Control::Connect);
    }

    /// Clean close; also spends the retry budget so nothing reconnects until
    /// [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) {
        let _ = self.control.send(Control::Disconnect);
    }

    /// Restores the retry budget and connects.
    pub fn reconnect(&self) {
        let _ = self.control.send(Control::Reconnect);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// [`disconnect`](Self::disconnect), then waits for the supervisor to
    /// finish the close handshake and exit.
    pub async fn shutdown(mut self) {
        self.disconnect();
        // Swap out the only live sender so the supervisor sees the channel
        // close right after the disconnect.
        let (detached, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.control, detached));
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                warn!("live supervisor ended abnormally: {e}");
            }
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Outcome {
    Retry,
    Idle,
    Shutdown,
}

struct Supervisor {
    url: Url,
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    events: mpsc::UnboundedSender<LiveEvent>,
    control: mpsc::UnboundedReceiver<Control>,
    state: watch::Sender<ConnectionState>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut wanted = false;
        loop {
            if !wanted {
                match self.control.recv().await {
                    Some(Control::Connect) => wanted = true,
                    Some(Control::Reconnect) => {
                        self.backoff.reset();
                        wanted = true;
                    }
                    Some(Control::Disconnect) => self.backoff.exhaust(),
                    None => return,
                }
                continue;
            }
            match self.session().await {
                Outcome::Retry => {}
                Outcome::Idle => wanted = false,
                Outcome::Shutdown => return,
            }
        }
    }

    /// One connection from `Connecting` until it closes.
    async fn session(&mut self) -> Outcome {
        self.state.send_replace(ConnectionState::Connecting);
        let connector = self.connector.clone();
        let url = self.url.clone();
        let connect = connector.connect(&url);
        tokio::pin!(connect);

        let result = loop {
            let ctl = tokio::select! {
                res = &mut connect => break res,
                ctl = self.control.recv() => ctl,
            };
            match ctl {
                Some(Control::Disconnect) => {
                    self.backoff.exhaust();
                    self.state.send_replace(ConnectionState::Disconnected);
                    return Outcome::Idle;
                }
                Some(Control::Reconnect) => self.backoff.reset(),
                Some(Control::Connect) => debug!("already connecting"),
                None => return Outcome::Shutdown,
            }
        };

        let mut transport = match result {
            Ok(t) => t,
            Err(e) => {
                warn!("{e}");
                self.state.send_replace(ConnectionState::Disconnected);
                return self.wait_retry().await;
            }
        };
        info!("live channel connected to {}", self.url);
        self.backoff.reset();
        self.state.send_replace(ConnectionState::Connected);

        loop {
            let step = tokio::select! {
                frame = transport.next_frame() => Ok(frame),
                ctl = self.control.recv() => Err(ctl),
            };
            match step {
                Ok(Frame::Text(text)) => self.deliver(&text),
                Ok(Frame::Closed { clean: true }) => {
                    info!("live channel closed by server");
                    self.state.send_replace(ConnectionState::Disconnected);
                    return Outcome::Idle;
                }
                Ok(Frame::Closed { clean: false }) => {
                    warn!("live channel dropped");
                    self.state.send_replace(ConnectionState::Disconnected);
                    return self.wait_retry().await;
                }
                Err(Some(Control::Disconnect)) => {
                    transport.close().await;
                    self.backoff.exhaust();
                    self.state.send_replace(ConnectionState::Disconnected);
                    info!("live channel disconnected");
                    return Outcome::Idle;
                }
                Err(Some(Control::Reconnect)) => self.backoff.reset(),
                Err(Some(Control::Connect)) => debug!("already connected"),
                Err(None) => {
                    transport.close().await;
                    self.state.send_replace(ConnectionState::Disconnected);
                    return Outcome::Shutdown;
                }
            }
        }
    }

    async fn wait_retry(&mut self) -> Outcome {
        let Some(delay) = self.backoff.next_delay() else {
            warn!("live channel: reconnect budget spent, staying offline");
            return Outcome::Idle;
        };
        info!(
            "reconnecting in {}ms (attempt {}/{})",
            delay.as_millis(),
            self.backoff.attempts(),
            self.backoff.max_attempts
        );
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        let ctl = tokio::select! {
            _ = &mut sleep => return Outcome::Retry,
            ctl = self.control.recv() => ctl,
        };
        match ctl {
            Some(Control::Disconnect) => {
                self.backoff.exhaust();
                Outcome::Idle
            }
            Some(Control::Reconnect) => {
                self.backoff.reset();
                Outcome::Retry
            }
            Some(Control::Connect) => Outcome::Retry,
            None => Outcome::Shutdown,
        }
    }

    fn deliver(&self, text: &str) {
        match LiveEvent::parse(text) {
            Ok(event) => {
                if self.events.send(event).is_err() {
                    debug!("no live event consumer, dropping event");
                }
            }
            Err(e) => warn!("dropping live event: {e}"),
        }
    }
}
