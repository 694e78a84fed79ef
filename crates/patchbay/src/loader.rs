use std::path::Path;

use anyhow::Context;
use patchproto::command::{self, Command};
use tracing::{info, warn};

use crate::routes::RoutingTable;

/// Apply a preset route file to the table, one `route` command per line.
///
/// Uses the console grammar but skips the console's liveness check: presets
/// are written before any client has connected. Blank lines and lines that
/// are not route commands are skipped; bad commands are reported per line
/// without aborting the rest. Returns the number of applied commands.
pub fn load_routes(path: &Path, routes: &mut RoutingTable) -> anyhow::Result<usize> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read route file {}", path.display()))?;

    let mut applied = 0usize;
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || !line.starts_with("route") {
            continue;
        }
        match command::parse(line) {
            Ok(Command::Route(spec)) => {
                for (s, d) in spec.expand() {
                    routes.set(spec.src, s, spec.dst, d);
                    info!(
                        src = %spec.src, src_ch = s, dst = %spec.dst, dst_ch = d,
                        "preconfigured route"
                    );
                }
                applied += 1;
            }
            Ok(_) => warn!(line = i + 1, "route file: not a route command"),
            Err(e) => warn!(line = i + 1, err = %e, "route file: bad command"),
        }
    }
    Ok(applied)
}
