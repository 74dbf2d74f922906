//! Visibility-aware refresh timer.
//!
//! Ticks are plain `()` messages on a channel; the inbox loop turns each one
//! into a full refresh. While hidden the timer is parked. Becoming visible
//! again emits one catch-up tick and restarts the period.

use std::time::Duration;

use log::debug;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

pub struct Poller {
    visible: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Poller {
    /// Starts the timer. The first tick is one `period` away; the caller
    /// is expected to do its own initial refresh.
    pub fn spawn(period: Duration, visible: bool, ticks: mpsc::UnboundedSender<()>) -> Self {
        let (visible_tx, visible_rx) = watch::channel(visible);
        let task = tokio::spawn(run(period, visible_rx, ticks));
        Self { visible: visible_tx, task }
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.send_if_modified(|v| {
            let changed = *v != visible;
            *v = visible;
            changed
        });
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(period: Duration, mut visible: watch::Receiver<bool>, ticks: mpsc::UnboundedSender<()>) {
    let mut resumed = false;
    loop {
        while !*visible.borrow_and_update() {
            if visible.changed().await.is_err() {
                return;
            }
            resumed = true;
        }
        if resumed && ticks.send(()).is_err() {
            return;
        }

        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let hidden = tokio::select! {
                _ = interval.tick() => {
                    if ticks.send(()).is_err() {
                        return;
                    }
                    false
                }
                changed = visible.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    !*visible.borrow_and_update()
                }
            };
            if hidden {
                debug!("poller parked while hidden");
                break;
            }
        }
    }
}
