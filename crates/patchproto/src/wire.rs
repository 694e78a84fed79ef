use crate::CHANNEL_COUNT;
use crate::ClientId;

/// An output-channel message as sent by a client: `out<N>: <payload>`.
///
/// The channel index must sit directly before the colon; whitespace after
/// the colon is not part of the payload. Frames that do not match are not
/// protocol errors, they are simply not output messages (the dispatcher
/// drops them silently).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutFrame<'a> {
    pub channel: usize,
    pub payload: &'a str,
}

pub fn parse_out(line: &str) -> Option<OutFrame<'_>> {
    let rest = line.strip_prefix("out")?;
    let colon = rest.find(':')?;
    let channel = rest[..colon].parse::<usize>().ok()?;
    if channel >= CHANNEL_COUNT {
        return None;
    }
    let payload = rest[colon + 1..].trim_start_matches([' ', '\t']);
    Some(OutFrame { channel, payload })
}

/// Render the downstream envelope for a forwarded message:
/// `in<N> from client<ID>: <payload>` (no trailing newline).
pub fn input_envelope(channel: usize, src: ClientId, payload: &str) -> String {
    format!("in{channel} from client{src}: {payload}")
}

/// A forwarded message as seen by the receiving client. The inverse of
/// [`input_envelope`]; mostly useful to client implementations and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFrame<'a> {
    pub channel: usize,
    pub src: ClientId,
    pub payload: &'a str,
}

pub fn parse_input(line: &str) -> Option<InFrame<'_>> {
    let rest = line.strip_prefix("in")?;
    let (ch, rest) = rest.split_once(" from client")?;
    let channel = ch.parse::<usize>().ok()?;
    if channel >= CHANNEL_COUNT {
        return None;
    }
    let (id, payload) = rest.split_once(": ")?;
    let src = id.parse::<ClientId>().ok()?;
    Some(InFrame {
        channel,
        src,
        payload,
    })
}
