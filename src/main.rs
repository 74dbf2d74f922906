use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::{mpsc, watch};

use unified_inbox::api::adapter::Adapters;
use unified_inbox::api::audit::RestAudit;
use unified_inbox::api::client::ApiClient;
use unified_inbox::api::live::WsConnector;
use unified_inbox::app::Config;
use unified_inbox::logging;
use unified_inbox::model::{Category, Delivery, Sender};
use unified_inbox::sync::send::OutboundMessage;
use unified_inbox::sync::{Inbox, InboxHandle, Snapshot};

const HELP: &str = "commands: select [id] | send <id> <text> | category <id> <category> | hide | show | refresh | dismiss | quit";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    logging::init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let base_url = match config.base_url() {
        Ok(url) => url,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let client = ApiClient::new(base_url.as_str(), &config.session);
    let adapters = Adapters::rest(&client);
    let audit = Arc::new(RestAudit::new(client));
    let (inbox, handle) = match Inbox::new(&config, adapters, audit, Arc::new(WsConnector)) {
        Ok(pair) => pair,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    info!("syncing with {} as {}", base_url, config.session.display_name());

    let inbox_task = tokio::spawn(inbox.run());
    tokio::spawn(print_snapshots(handle.subscribe()));
    let mut lines = stdin_lines();
    println!("{HELP}");

    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) => {
                    if !run_command(&handle, line.trim()).await {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    handle.shutdown();
    if let Err(e) = inbox_task.await {
        warn!("inbox task failed: {e}");
    }
    ExitCode::SUCCESS
}

/// Reads stdin on a plain thread so a pending read never holds up runtime
/// shutdown.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Returns false when the operator asked to quit.
async fn run_command(handle: &InboxHandle, line: &str) -> bool {
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match verb {
        "" => {}
        "select" => handle.select(Some(rest).filter(|id| !id.is_empty())),
        "send" => {
            let (id, text) = rest.split_once(' ').unwrap_or((rest, ""));
            if let Err(e) = handle.send(OutboundMessage::text(id, text.trim())).await {
                println!("not sent: {e}");
            }
        }
        "category" => {
            let (id, raw) = rest.split_once(' ').unwrap_or((rest, ""));
            match Category::from_str(raw.trim()) {
                Ok(category) => handle.set_category(id, category),
                Err(e) => println!("{e}"),
            }
        }
        "hide" => handle.set_visible(false),
        "show" => handle.set_visible(true),
        "refresh" => handle.refresh_now(),
        "dismiss" => handle.dismiss_notice(),
        "quit" | "exit" => return false,
        _ => println!("{HELP}"),
    }
    true
}

async fn print_snapshots(mut rx: watch::Receiver<Snapshot>) {
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        print!("{}", render(&snapshot));
    }
}

fn render(s: &Snapshot) -> String {
    let mut out = String::new();
    let status = match (s.connected, s.loading) {
        (true, true) => "live, refreshing",
        (true, false) => "live",
        (false, true) => "offline, refreshing",
        (false, false) => "offline",
    };
    out.push_str(&format!("--- {} conversations ({status}) ---\n", s.conversations.len()));
    if let Some(notice) = &s.notice {
        out.push_str(&format!("! {notice}\n"));
    }
    for c in &s.conversations {
        let marker = if s.selected.as_deref() == Some(c.id.as_str()) { '>' } else { ' ' };
        let unread = if c.unread { '*' } else { ' ' };
        out.push_str(&format!(
            "{marker}{unread} {:>5} [{}] {} ({}) {} {}\n",
            c.id,
            c.platform,
            c.participant_name,
            c.category,
            c.last_message_time.as_deref().unwrap_or("-"),
            c.last_message.as_deref().unwrap_or(""),
        ));
    }
    if let Some(c) = s.selected_conversation() {
        for m in &c.messages {
            let who = match m.sender {
                Sender::Me => "me",
                Sender::User => c.participant_name.as_str(),
            };
            let state = match m.delivery {
                Delivery::Confirmed => "",
                Delivery::Pending => " (sending)",
                Delivery::Sent => " (sent)",
                Delivery::Failed => " (failed)",
            };
            out.push_str(&format!("    {} {who}: {}{state}\n", m.time, m.text));
        }
    }
    out
}
