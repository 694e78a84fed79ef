use crate::CHANNEL_COUNT;
use crate::ClientId;

pub const ROUTE_USAGE: &str = "route <srcID> <srcCh|all> <dstID> <dstCh|all>";
pub const PRINT_USAGE: &str = "print <clientID>";
pub const MONITOR_USAGE: &str = "monitor [fps]";

/// One parsed operator command. The startup route file reuses the same
/// grammar but only ever applies `Route` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Routes,
    Route(RouteSpec),
    Print(ClientId),
    Monitor(Option<u32>),
    Exit,
}

/// Channel selector on either side of a `route` command: a single index or
/// `all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSel {
    All,
    One(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSpec {
    pub src: ClientId,
    pub src_ch: ChannelSel,
    pub dst: ClientId,
    pub dst_ch: ChannelSel,
}

impl RouteSpec {
    /// Expand into concrete (source channel, destination channel) pairs.
    ///
    /// `all`/`all` maps index to index; a fixed destination fans in from
    /// every source channel; a fixed source fans out to every destination
    /// channel.
    pub fn expand(&self) -> Vec<(usize, usize)> {
        match (self.src_ch, self.dst_ch) {
            (ChannelSel::One(s), ChannelSel::One(d)) => vec![(s, d)],
            (ChannelSel::One(s), ChannelSel::All) => {
                (0..CHANNEL_COUNT).map(|d| (s, d)).collect()
            }
            (ChannelSel::All, ChannelSel::One(d)) => {
                (0..CHANNEL_COUNT).map(|s| (s, d)).collect()
            }
            (ChannelSel::All, ChannelSel::All) => {
                (0..CHANNEL_COUNT).map(|i| (i, i)).collect()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Unknown(String),
    Usage(&'static str),
    BadClientId(String),
    BadChannel(String),
    BadFps(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Unknown(c) => write!(f, "Unknown command: {c}"),
            CommandError::Usage(u) => write!(f, "Usage: {u}"),
            CommandError::BadClientId(s) => {
                write!(f, "Invalid client id '{s}'. Must be a positive integer")
            }
            CommandError::BadChannel(s) => {
                write!(
                    f,
                    "Invalid channel '{s}'. Must be 0..{} or 'all'",
                    CHANNEL_COUNT - 1
                )
            }
            CommandError::BadFps(s) => {
                write!(f, "Invalid fps '{s}'. Must be a positive integer")
            }
        }
    }
}

impl std::error::Error for CommandError {}

/// Parse one non-empty console line. The caller is expected to trim the line
/// and skip blank input.
pub fn parse(line: &str) -> Result<Command, CommandError> {
    let mut it = line.split_whitespace();
    let cmd = it.next().unwrap_or("");

    match cmd {
        "help" => Ok(Command::Help),
        "list" => Ok(Command::List),
        "routes" => Ok(Command::Routes),
        "exit" => Ok(Command::Exit),
        "print" => {
            let raw = it.next().ok_or(CommandError::Usage(PRINT_USAGE))?;
            let id = raw
                .parse::<ClientId>()
                .map_err(|_| CommandError::BadClientId(raw.to_string()))?;
            Ok(Command::Print(id))
        }
        "monitor" => match it.next() {
            None => Ok(Command::Monitor(None)),
            Some(raw) => match raw.parse::<u32>() {
                Ok(fps) if fps > 0 => Ok(Command::Monitor(Some(fps))),
                _ => Err(CommandError::BadFps(raw.to_string())),
            },
        },
        "route" => {
            let (Some(src), Some(src_ch), Some(dst), Some(dst_ch)) =
                (it.next(), it.next(), it.next(), it.next())
            else {
                return Err(CommandError::Usage(ROUTE_USAGE));
            };
            let src = src
                .parse::<ClientId>()
                .map_err(|_| CommandError::BadClientId(src.to_string()))?;
            let dst = dst
                .parse::<ClientId>()
                .map_err(|_| CommandError::BadClientId(dst.to_string()))?;
            let src_ch = parse_channel(src_ch, "out")
                .ok_or_else(|| CommandError::BadChannel(src_ch.to_string()))?;
            let dst_ch = parse_channel(dst_ch, "in")
                .ok_or_else(|| CommandError::BadChannel(dst_ch.to_string()))?;
            Ok(Command::Route(RouteSpec {
                src,
                src_ch,
                dst,
                dst_ch,
            }))
        }
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

// Accepts `all`, a bare index, or the index with its direction prefix
// (`out3` on the source side, `in3` on the destination side).
fn parse_channel(s: &str, prefix: &str) -> Option<ChannelSel> {
    if s == "all" {
        return Some(ChannelSel::All);
    }
    let digits = s.strip_prefix(prefix).unwrap_or(s);
    let ch = digits.parse::<usize>().ok()?;
    (ch < CHANNEL_COUNT).then_some(ChannelSel::One(ch))
}
