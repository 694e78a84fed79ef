use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{Level, info, warn};

mod broker;
mod console;
mod loader;
mod monitor;
mod registry;
mod routes;

use broker::Broker;
use console::ConsoleMode;
use routes::RoutingTable;

const DEFAULT_MAX_CLIENTS: usize = 20;

fn usage_and_exit() -> ! {
    eprintln!(
        "patchbay (channel switchboard)\n\n\
USAGE:\n  patchbay [--bind HOST:PORT] [--route-file PATH] [--log-dir DIR] [--max-clients N]\n\n\
ENV:\n  PATCHBAY_BIND          default 0.0.0.0:12345\n  PATCHBAY_ROUTE_FILE    default route.rt\n  PATCHBAY_LOG_DIR       default logs (recording CSVs land here)\n  PATCHBAY_MAX_CLIENTS   default 20\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    bind: SocketAddr,
    route_file: PathBuf,
    log_dir: PathBuf,
    max_clients: usize,
}

fn parse_args() -> Config {
    let mut bind: SocketAddr = std::env::var("PATCHBAY_BIND")
        .unwrap_or_else(|_| "0.0.0.0:12345".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());

    let mut route_file: PathBuf = std::env::var("PATCHBAY_ROUTE_FILE")
        .unwrap_or_else(|_| "route.rt".to_string())
        .into();

    let mut log_dir: PathBuf = std::env::var("PATCHBAY_LOG_DIR")
        .unwrap_or_else(|_| "logs".to_string())
        .into();

    let mut max_clients: usize = std::env::var("PATCHBAY_MAX_CLIENTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_CLIENTS);

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--route-file" => {
                route_file = it.next().unwrap_or_else(|| usage_and_exit()).into();
            }
            "--log-dir" => {
                log_dir = it.next().unwrap_or_else(|| usage_and_exit()).into();
            }
            "--max-clients" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                max_clients = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }
    if max_clients == 0 {
        usage_and_exit();
    }

    Config {
        bind,
        route_file,
        log_dir,
        max_clients,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,patchbay=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();

    // Failing to listen is the only fatal condition; everything after this
    // degrades and keeps the process alive.
    let listener = TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("bind {}", cfg.bind))?;

    let mut routes = RoutingTable::new();
    match loader::load_routes(&cfg.route_file, &mut routes) {
        Ok(0) => warn!(
            path = %cfg.route_file.display(),
            "route file had no valid route commands"
        ),
        Ok(n) => info!(path = %cfg.route_file.display(), applied = n, "route file applied"),
        Err(e) => warn!(err = %e, "route file not loaded"),
    }

    let (events_tx, events_rx) = mpsc::channel(1024);
    let (mode_tx, mode_rx) = watch::channel(ConsoleMode::Line);
    tokio::spawn(broker::accept_task(listener, events_tx.clone()));
    tokio::spawn(console::console_task(events_tx.clone(), mode_rx));

    info!(bind = %cfg.bind, max_clients = cfg.max_clients, "patchbay listening");
    println!("Patchbay listening on {}.", cfg.bind);
    println!("Type 'help' for commands.");

    Broker::new(cfg.max_clients, cfg.log_dir, routes, events_tx, mode_tx)
        .run(events_rx)
        .await
}
