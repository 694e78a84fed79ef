use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Local;
use crossterm::cursor::MoveTo;
use crossterm::queue;
use crossterm::terminal::{Clear, ClearType, disable_raw_mode, enable_raw_mode};
use patchproto::{CHANNEL_COUNT, ClientId};
use tokio::time::{Interval, MissedTickBehavior};

use crate::registry::Registry;

pub const DEFAULT_FPS: u32 = 2;

/// Restores the operator terminal on drop, covering every exit path out of
/// monitor mode.
#[derive(Debug)]
pub struct RawModeGuard(());

impl RawModeGuard {
    pub fn enable() -> std::io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self(()))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// The modal monitor view. Exists only while the operator is in monitor
/// mode; dropping it closes any open recording log and restores the
/// terminal.
#[derive(Debug)]
pub struct MonitorState {
    pub fps: u32,
    pub interval: Interval,
    pub recording: Option<RecordingSession>,
    _raw: RawModeGuard,
}

impl MonitorState {
    pub fn enter(fps: u32) -> std::io::Result<Self> {
        let raw = RawModeGuard::enable()?;
        let mut interval =
            tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(fps.max(1))));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Self {
            fps,
            interval,
            recording: None,
            _raw: raw,
        })
    }
}

/// One recording session. The set of clients snapshotted at start fixes the
/// column schema for the session's lifetime: clients joining later are not
/// added, departing ones keep their (frozen) columns.
#[derive(Debug)]
pub struct RecordingSession {
    started: Instant,
    path: PathBuf,
    file: BufWriter<File>,
    clients: Vec<ClientId>,
}

impl RecordingSession {
    pub fn start(log_dir: &Path, registry: &Registry) -> anyhow::Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("create log dir {}", log_dir.display()))?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = log_dir.join(format!("monitor_{stamp}.csv"));
        let file =
            File::create(&path).with_context(|| format!("create {}", path.display()))?;
        let mut w = BufWriter::new(file);
        let clients = registry.live_ids();

        let mut header = String::from("timestamp");
        for id in &clients {
            for ch in 0..CHANNEL_COUNT {
                header.push_str(&format!(",client{id}_ch{ch}"));
            }
        }
        writeln!(w, "{header}")?;
        w.flush()?;

        Ok(Self {
            started: Instant::now(),
            path,
            file: w,
            clients,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one snapshot row: elapsed time since the session started, then
    /// the cached output text of every channel of every snapshotted client.
    pub fn append_row(&mut self, registry: &Registry) -> std::io::Result<()> {
        let elapsed = self.started.elapsed();
        let mut row = format!("\"{}.{:06}\"", elapsed.as_secs(), elapsed.subsec_micros());
        for id in &self.clients {
            for ch in 0..CHANNEL_COUNT {
                let text = registry
                    .find(*id)
                    .map(|c| c.cache.last_out[ch].as_str())
                    .unwrap_or("");
                row.push_str(&format!(",\"{}\"", csv_field(text)));
            }
        }
        writeln!(self.file, "{row}")?;
        self.file.flush()
    }
}

// CR/LF would break row integrity; everything else is written as-is.
fn csv_field(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

/// Redraw the live table. The view is rebuilt from scratch every tick.
pub fn draw(
    out: &mut impl Write,
    registry: &Registry,
    fps: u32,
    recording: Option<&Path>,
) -> std::io::Result<()> {
    queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;
    write!(out, "=== Monitor (fps: {fps}) ===\r\n")?;
    write!(out, "Press 'q' to quit, 'r' to toggle recording.\r\n")?;
    match recording {
        Some(p) => write!(out, "Recording: ON (file: {})\r\n", p.display())?,
        None => write!(out, "Recording: OFF\r\n")?,
    }
    write!(out, "{}\r\n", "-".repeat(72))?;
    write!(
        out,
        "{:<10} | Output channels (0..{})\r\n",
        "Client",
        CHANNEL_COUNT - 1
    )?;
    write!(out, "{}\r\n", "-".repeat(72))?;
    for c in registry.live_clients() {
        write!(out, "client{:<4} |", c.id.0)?;
        for ch in 0..CHANNEL_COUNT {
            write!(out, " [{ch}]: {:<10.10}", c.cache.last_out[ch])?;
        }
        out.write_all(b"\r\n")?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn registry_with(n: usize) -> Registry {
        let mut r = Registry::new(8);
        for _ in 0..n {
            let (tx, _rx) = mpsc::channel::<Bytes>(8);
            r.allocate("127.0.0.1:50000".parse().unwrap(), tx).unwrap();
        }
        r
    }

    fn row_stamp(line: &str) -> (u64, u32) {
        let field = line.split(',').next().unwrap().trim_matches('"');
        let (s, us) = field.split_once('.').unwrap();
        (s.parse().unwrap(), us.parse().unwrap())
    }

    #[test]
    fn writes_header_and_one_row_per_append() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut r = registry_with(2);
        r.record_output(ClientId(1), 0, "alpha");
        r.record_output(ClientId(2), 4, "omega");

        let mut rec = RecordingSession::start(dir.path(), &r).unwrap();
        let path = rec.path().to_path_buf();
        for _ in 0..3 {
            rec.append_row(&r).unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        drop(rec);

        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "timestamp,client1_ch0,client1_ch1,client1_ch2,client1_ch3,client1_ch4,\
             client2_ch0,client2_ch1,client2_ch2,client2_ch3,client2_ch4"
        );
        assert!(lines[1].contains("\"alpha\""));
        assert!(lines[1].ends_with("\"omega\""));

        // Timestamps are strictly increasing down the rows.
        let stamps: Vec<(u64, u32)> = lines[1..].iter().map(|l| row_stamp(l)).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn departed_clients_keep_frozen_columns() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut r = registry_with(2);
        r.record_output(ClientId(2), 0, "last seen");

        let mut rec = RecordingSession::start(dir.path(), &r).unwrap();
        r.release(ClientId(2));
        rec.append_row(&r).unwrap();

        // A client joining mid-session gets no column.
        let (tx, _rx) = mpsc::channel::<Bytes>(8);
        r.allocate("127.0.0.1:50001".parse().unwrap(), tx).unwrap();
        rec.append_row(&r).unwrap();
        let path = rec.path().to_path_buf();
        drop(rec);

        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(!lines[0].contains("client3"));
        for row in &lines[1..] {
            assert!(row.contains("\"last seen\""));
            assert_eq!(row.matches('"').count(), (1 + 2 * CHANNEL_COUNT) * 2);
        }
    }

    #[test]
    fn newlines_in_payloads_become_spaces() {
        assert_eq!(csv_field("a\nb\r\nc"), "a b  c");
        assert_eq!(csv_field("plain"), "plain");
    }

    #[test]
    fn draw_renders_live_clients() {
        let mut r = registry_with(2);
        r.record_output(ClientId(1), 0, "hi");
        r.release(ClientId(2));

        let mut buf = Vec::new();
        draw(&mut buf, &r, 4, None).unwrap();
        let s = String::from_utf8_lossy(&buf);
        assert!(s.contains("=== Monitor (fps: 4) ==="));
        assert!(s.contains("Recording: OFF"));
        assert!(s.contains("client1"));
        assert!(s.contains("[0]: hi"));
        assert!(!s.contains("client2 "));
    }
}
