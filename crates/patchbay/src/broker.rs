use std::io::Write as _;
use std::net::SocketAddr;
use std::path::PathBuf;

use bytes::Bytes;
use patchio::line::LineReader;
use patchproto::command::{self, Command};
use patchproto::{CHANNEL_COUNT, ClientId, wire};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::console::{self, ConsoleMode};
use crate::monitor::{self, DEFAULT_FPS, MonitorState, RecordingSession};
use crate::registry::{Registry, RegistryFull};
use crate::routes::RoutingTable;

const WRITE_QUEUE_DEPTH: usize = 128;

/// Everything the broker reacts to. All state mutation happens on the broker
/// task, one event at a time; producers only ever send these.
#[derive(Debug)]
pub enum Event {
    Incoming(TcpStream, SocketAddr),
    Frame { id: ClientId, line: Bytes },
    Closed { id: ClientId },
    ConsoleLine(String),
    Key(u8),
    ConsoleEof,
}

pub async fn accept_task(listener: TcpListener, events: mpsc::Sender<Event>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if events.send(Event::Incoming(stream, peer)).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(err = %e, "accept failed"),
        }
    }
}

async fn reader_task(id: ClientId, rd: OwnedReadHalf, events: mpsc::Sender<Event>) {
    let mut lr = LineReader::new(rd);
    loop {
        match lr.next_frame().await {
            Ok(Some(line)) => {
                if events.send(Event::Frame { id, line }).await.is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(client = %id, err = %e, "read error");
                break;
            }
        }
    }
    let _ = events.send(Event::Closed { id }).await;
}

async fn writer_task(mut wr: OwnedWriteHalf, mut rx: mpsc::Receiver<Bytes>) {
    while let Some(b) = rx.recv().await {
        if wr.write_all(&b).await.is_err() {
            break;
        }
    }
}

/// The switchboard's single logical writer: owns the client registry, the
/// routing table, and the monitor state, and is the only place any of them
/// are touched.
pub struct Broker {
    registry: Registry,
    routes: RoutingTable,
    log_dir: PathBuf,
    events_tx: mpsc::Sender<Event>,
    console_mode: watch::Sender<ConsoleMode>,
    monitor: Option<MonitorState>,
    shutdown: bool,
}

impl Broker {
    pub fn new(
        capacity: usize,
        log_dir: PathBuf,
        routes: RoutingTable,
        events_tx: mpsc::Sender<Event>,
        console_mode: watch::Sender<ConsoleMode>,
    ) -> Self {
        Self {
            registry: Registry::new(capacity),
            routes,
            log_dir,
            events_tx,
            console_mode,
            monitor: None,
            shutdown: false,
        }
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) -> anyhow::Result<()> {
        loop {
            // The monitor cadence only exists while monitor mode is active;
            // client traffic keeps flowing through the same loop either way.
            let ev = match self.monitor.as_mut() {
                Some(mon) => tokio::select! {
                    ev = events.recv() => match ev {
                        Some(ev) => Some(ev),
                        None => break,
                    },
                    _ = mon.interval.tick() => None,
                },
                None => match events.recv().await {
                    Some(ev) => Some(ev),
                    None => break,
                },
            };

            match ev {
                Some(ev) => self.on_event(ev),
                None => self.on_tick(),
            }
            if self.shutdown {
                break;
            }
        }

        // Graceful shutdown: dropping the monitor closes any open recording
        // log and restores the terminal; releasing every client closes the
        // connections' write sides.
        self.monitor = None;
        self.registry.release_all();
        info!("patchbay shut down");
        Ok(())
    }

    fn on_event(&mut self, ev: Event) {
        match ev {
            Event::Incoming(stream, peer) => self.on_incoming(stream, peer),
            Event::Frame { id, line } => self.on_frame(id, line),
            Event::Closed { id } => {
                if self.registry.release(id) {
                    info!(client = %id, "client disconnected");
                }
            }
            Event::ConsoleLine(line) => self.on_console_line(&line),
            Event::Key(key) => self.on_key(key),
            Event::ConsoleEof => info!("console input closed; commands disabled"),
        }
    }

    fn on_incoming(&mut self, stream: TcpStream, peer: SocketAddr) {
        let (write_tx, write_rx) = mpsc::channel::<Bytes>(WRITE_QUEUE_DEPTH);
        let id = match self.registry.allocate(peer, write_tx) {
            Ok(id) => id,
            Err(RegistryFull) => {
                info!(peer = %peer, "rejecting connection: no free client slots");
                tokio::spawn(async move {
                    let mut stream = stream;
                    let _ = stream.write_all(b"Server full.\n").await;
                });
                return;
            }
        };

        let (rd, wr) = stream.into_split();
        tokio::spawn(writer_task(wr, write_rx));
        tokio::spawn(reader_task(id, rd, self.events_tx.clone()));

        let client = self.registry.find(id).expect("entry just allocated");
        client.send(Bytes::from(format!(
            "Welcome to Patchbay. You are client_id={id}, with {CHANNEL_COUNT} in / {CHANNEL_COUNT} out.\n"
        )));
        info!(client = %id, peer = %peer, "client connected");
    }

    /// Dispatch one wire frame from a connected client.
    fn on_frame(&mut self, id: ClientId, line: Bytes) {
        if !self.registry.is_live(id) {
            return;
        }
        // Frames that are not valid UTF-8 or do not match the output-channel
        // pattern are dropped silently.
        let Ok(text) = std::str::from_utf8(&line) else {
            return;
        };
        let Some(out) = wire::parse_out(text) else {
            return;
        };

        // The source cache updates whether or not the channel is routed.
        self.registry.record_output(id, out.channel, out.payload);

        let Some(route) = self.routes.get(id, out.channel) else {
            return;
        };
        if !self.registry.is_live(route.dst) {
            return;
        }
        let envelope = wire::input_envelope(route.dst_ch, id, out.payload);
        if let Some(dst) = self.registry.find(route.dst) {
            dst.send(Bytes::from(format!("{envelope}\n")));
        }
        self.registry.record_input(route.dst, route.dst_ch, &envelope);
    }

    fn on_console_line(&mut self, line: &str) {
        // Lines typed just before the switch into monitor mode can still be
        // queued behind it; the monitor owns the console until it exits.
        if self.monitor.is_some() {
            return;
        }
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match command::parse(line) {
            Ok(Command::Help) => print!("{}", console::help_text()),
            Ok(Command::List) => print!("{}", console::render_list(&self.registry)),
            Ok(Command::Routes) => print!("{}", console::render_routes(&self.routes)),
            Ok(Command::Print(id)) => print!("{}", console::render_print(&self.registry, id)),
            Ok(Command::Route(spec)) => self.apply_route(&spec),
            Ok(Command::Monitor(fps)) => self.enter_monitor(fps.unwrap_or(DEFAULT_FPS)),
            Ok(Command::Exit) => {
                println!("Shutting down.");
                self.shutdown = true;
            }
            Err(e) => println!("{e}"),
        }
        let _ = std::io::stdout().flush();
    }

    // The console form requires both endpoints to be connected; the startup
    // file loader writes the table directly and does not.
    fn apply_route(&mut self, spec: &command::RouteSpec) {
        for (end, role) in [(spec.src, "source"), (spec.dst, "destination")] {
            if !self.registry.is_live(end) {
                println!("No connected client {end} ({role})");
                return;
            }
        }
        for (s, d) in spec.expand() {
            self.routes.set(spec.src, s, spec.dst, d);
            println!(
                "Routed client{} out{s} -> client{} in{d}",
                spec.src, spec.dst
            );
        }
    }

    fn enter_monitor(&mut self, fps: u32) {
        match MonitorState::enter(fps) {
            Ok(mon) => {
                let _ = self.console_mode.send(ConsoleMode::Key);
                self.monitor = Some(mon);
                // The first interval tick fires immediately and draws the view.
            }
            Err(e) => println!("monitor: cannot switch the terminal to raw input: {e}"),
        }
    }

    fn leave_monitor(&mut self) {
        // Dropping the state closes any open recording log and restores the
        // terminal input mode.
        self.monitor = None;
        let _ = self.console_mode.send(ConsoleMode::Line);
        println!("Exiting monitor mode.");
        let _ = std::io::stdout().flush();
    }

    fn on_key(&mut self, key: u8) {
        let Some(mon) = self.monitor.as_mut() else {
            return;
        };
        match key {
            // Ctrl-C arrives as a raw byte while the terminal is raw.
            b'q' | b'Q' | 0x03 => self.leave_monitor(),
            b'r' | b'R' => {
                if mon.recording.take().is_none() {
                    match RecordingSession::start(&self.log_dir, &self.registry) {
                        Ok(rec) => mon.recording = Some(rec),
                        Err(e) => warn!(err = %e, "recording not started"),
                    }
                }
            }
            _ => {}
        }
    }

    fn on_tick(&mut self) {
        let Some(mon) = self.monitor.as_mut() else {
            return;
        };
        if let Some(rec) = mon.recording.as_mut() {
            if let Err(e) = rec.append_row(&self.registry) {
                warn!(err = %e, "recording write failed; stopping the session");
                mon.recording = None;
            }
        }
        let mut out = std::io::stdout();
        let _ = monitor::draw(
            &mut out,
            &self.registry,
            mon.fps,
            mon.recording.as_ref().map(|r| r.path()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    async fn start_server(capacity: usize) -> (SocketAddr, mpsc::Sender<Event>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events_tx, events_rx) = mpsc::channel(256);
        let (mode_tx, _mode_rx) = watch::channel(ConsoleMode::Line);
        tokio::spawn(accept_task(listener, events_tx.clone()));
        let broker = Broker::new(
            capacity,
            std::env::temp_dir(),
            RoutingTable::new(),
            events_tx.clone(),
            mode_tx,
        );
        tokio::spawn(broker.run(events_rx));
        (addr, events_tx)
    }

    // Connecting sequentially and waiting for each greeting pins the
    // identifier order: first connection is client 1, and so on.
    async fn connect(addr: SocketAddr) -> (LineReader<OwnedReadHalf>, OwnedWriteHalf) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (rd, wr) = stream.into_split();
        let mut lr = LineReader::new(rd);
        let greet = read_frame(&mut lr).await;
        assert!(greet.starts_with("Welcome to Patchbay. You are client_id="));
        (lr, wr)
    }

    async fn read_frame(lr: &mut LineReader<OwnedReadHalf>) -> String {
        let frame = timeout(Duration::from_secs(5), lr.next_frame())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("connection closed");
        String::from_utf8(frame.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn forwards_along_configured_route() {
        let (addr, events) = start_server(8).await;
        let (_a_rd, mut a_wr) = connect(addr).await; // client 1
        let (mut b_rd, _b_wr) = connect(addr).await; // client 2

        events
            .send(Event::ConsoleLine("route 1 0 2 0".into()))
            .await
            .unwrap();
        a_wr.write_all(b"out0: hello\n").await.unwrap();

        assert_eq!(read_frame(&mut b_rd).await, "in0 from client1: hello");
    }

    #[tokio::test]
    async fn last_route_write_wins() {
        let (addr, events) = start_server(8).await;
        let (_a_rd, mut a_wr) = connect(addr).await; // 1
        let (mut b_rd, _b_wr) = connect(addr).await; // 2
        let (mut c_rd, _c_wr) = connect(addr).await; // 3

        events
            .send(Event::ConsoleLine("route 1 0 2 0".into()))
            .await
            .unwrap();
        events
            .send(Event::ConsoleLine("route 1 0 3 1".into()))
            .await
            .unwrap();
        a_wr.write_all(b"out0: ping\n").await.unwrap();

        assert_eq!(read_frame(&mut c_rd).await, "in1 from client1: ping");

        // The overwritten destination sees nothing.
        let quiet = timeout(Duration::from_millis(200), b_rd.next_frame()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn dropped_destination_does_not_break_dispatch() {
        let (addr, events) = start_server(8).await;
        let (_a_rd, mut a_wr) = connect(addr).await; // 1
        let (b_rd, b_wr) = connect(addr).await; // 2
        events
            .send(Event::ConsoleLine("route 1 0 2 0".into()))
            .await
            .unwrap();

        drop(b_rd);
        drop(b_wr);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Routed toward the departed client: dropped silently.
        a_wr.write_all(b"out0: into the void\n").await.unwrap();

        // The dispatcher is still healthy: a fresh route forwards fine.
        let (mut c_rd, _c_wr) = connect(addr).await; // 3
        events
            .send(Event::ConsoleLine("route 1 0 3 2".into()))
            .await
            .unwrap();
        a_wr.write_all(b"out0: still here\n").await.unwrap();
        assert_eq!(read_frame(&mut c_rd).await, "in2 from client1: still here");
    }

    #[tokio::test]
    async fn reassembles_partial_frames_across_writes() {
        let (addr, events) = start_server(8).await;
        let (_a_rd, mut a_wr) = connect(addr).await; // 1
        let (mut b_rd, _b_wr) = connect(addr).await; // 2
        events
            .send(Event::ConsoleLine("route 1 all 2 all".into()))
            .await
            .unwrap();

        // One frame split mid-payload, then two frames in one write.
        a_wr.write_all(b"out0: he").await.unwrap();
        a_wr.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        a_wr.write_all(b"llo\nout1: x\n").await.unwrap();

        assert_eq!(read_frame(&mut b_rd).await, "in0 from client1: hello");
        assert_eq!(read_frame(&mut b_rd).await, "in1 from client1: x");
    }

    #[tokio::test]
    async fn rejects_when_full_and_keeps_existing_client() {
        let (addr, events) = start_server(1).await;
        let (mut a_rd, mut a_wr) = connect(addr).await; // 1

        let stream = TcpStream::connect(addr).await.unwrap();
        let (rd, _wr) = stream.into_split();
        let mut lr = LineReader::new(rd);
        assert_eq!(read_frame(&mut lr).await, "Server full.");
        let eof = timeout(Duration::from_secs(5), lr.next_frame())
            .await
            .unwrap()
            .unwrap();
        assert!(eof.is_none());

        // The admitted client is unaffected (loopback route to itself).
        events
            .send(Event::ConsoleLine("route 1 0 1 0".into()))
            .await
            .unwrap();
        a_wr.write_all(b"out0: echo\n").await.unwrap();
        assert_eq!(read_frame(&mut a_rd).await, "in0 from client1: echo");
    }

    #[tokio::test]
    async fn unrouted_and_malformed_frames_are_dropped() {
        let (addr, events) = start_server(8).await;
        let (_a_rd, mut a_wr) = connect(addr).await; // 1
        let (mut b_rd, _b_wr) = connect(addr).await; // 2

        // No route yet, bad channel, not a protocol frame at all.
        a_wr.write_all(b"out0: unrouted\n").await.unwrap();
        a_wr.write_all(b"out9: bad channel\n").await.unwrap();
        a_wr.write_all(b"hello there\n").await.unwrap();

        events
            .send(Event::ConsoleLine("route 1 1 2 1".into()))
            .await
            .unwrap();
        a_wr.write_all(b"out1: real\n").await.unwrap();
        assert_eq!(read_frame(&mut b_rd).await, "in1 from client1: real");
    }
}
