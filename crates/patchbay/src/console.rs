use patchio::scan::LineScanner;
use patchproto::{CHANNEL_COUNT, ClientId};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};

use crate::broker::Event;
use crate::monitor::DEFAULT_FPS;
use crate::registry::Registry;
use crate::routes::RoutingTable;

/// How the console task interprets stdin: whole lines (command mode) or raw
/// bytes (monitor keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleMode {
    Line,
    Key,
}

/// Owns stdin for the process lifetime; the broker flips the mode when the
/// monitor is entered or left.
pub async fn console_task(events: mpsc::Sender<Event>, mut mode: watch::Receiver<ConsoleMode>) {
    let mut stdin = tokio::io::stdin();
    let mut scan = LineScanner::new();
    let mut tmp = [0u8; 1024];

    loop {
        tokio::select! {
            res = stdin.read(&mut tmp) => {
                let n = match res {
                    Ok(0) | Err(_) => {
                        let _ = events.send(Event::ConsoleEof).await;
                        return;
                    }
                    Ok(n) => n,
                };
                // Copy the mode out so no watch borrow is held across awaits.
                let current = *mode.borrow();
                match current {
                    ConsoleMode::Line => {
                        scan.extend(&tmp[..n]);
                        while let Some(line) = scan.next_line() {
                            let line = String::from_utf8_lossy(&line).into_owned();
                            if events.send(Event::ConsoleLine(line)).await.is_err() {
                                return;
                            }
                        }
                    }
                    ConsoleMode::Key => {
                        for &b in &tmp[..n] {
                            if events.send(Event::Key(b)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            res = mode.changed() => {
                if res.is_err() {
                    return;
                }
                // A mode switch discards any half-typed input.
                scan.reset();
            }
        }
    }
}

pub fn help_text() -> String {
    let mut s = String::new();
    s.push_str("Commands:\n");
    s.push_str(" help                        - show this help\n");
    s.push_str(" list                        - list connected clients\n");
    s.push_str(" routes                      - list the routing table\n");
    s.push_str(" route <A> <ch|all> <B> <ch|all>\n");
    s.push_str("                             - connect clientA's output channel to clientB's\n");
    s.push_str("                               input channel ('all' expands across channels)\n");
    s.push_str(" print <clientID>            - show last data for all channels of one client\n");
    s.push_str(" monitor [fps]               - live view of all clients' outputs\n");
    s.push_str(&format!(
        "                               (default {DEFAULT_FPS} fps; in the view, 'r' toggles\n"
    ));
    s.push_str("                               recording to CSV and 'q' quits)\n");
    s.push_str(" exit                        - shut down the server\n");
    s
}

pub fn render_list(registry: &Registry) -> String {
    let mut s = String::from("Active clients:\n");
    let mut any = false;
    for c in registry.live_clients() {
        any = true;
        s.push_str(&format!(
            " clientID={} peer={} label={}\n",
            c.id, c.peer, c.label
        ));
    }
    if !any {
        s.push_str(" (none)\n");
    }
    s
}

pub fn render_routes(routes: &RoutingTable) -> String {
    let mut s = String::from("Routes:\n");
    if routes.is_empty() {
        s.push_str(" (none)\n");
        return s;
    }
    for (src, ch, r) in routes.iter() {
        s.push_str(&format!(
            " client{src}.out{ch} -> client{}.in{}\n",
            r.dst, r.dst_ch
        ));
    }
    s
}

pub fn render_print(registry: &Registry, id: ClientId) -> String {
    let Some(c) = registry.find(id) else {
        return format!("No client with id {id}\n");
    };

    let gone = if c.live { "" } else { " [disconnected]" };
    let mut s = format!("Data for client{} ({}){gone}:\n", c.id, c.label);
    s.push_str(&format!(
        "{:<8} | {:<50} | {:<50}\n",
        "Channel", "Output", "Input"
    ));
    s.push_str(&"-".repeat(114));
    s.push('\n');
    for ch in 0..CHANNEL_COUNT {
        s.push_str(&format!(
            "{:<8} | {:<50.50} | {:<50.50}\n",
            ch, c.cache.last_out[ch], c.cache.last_in[ch]
        ));
    }
    s
}
