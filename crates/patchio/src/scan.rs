use bytes::Bytes;
use bytes::BytesMut;
use memchr::memchr;

use crate::line::strip_eol;

/// Incremental newline splitter for byte chunks that arrive outside an
/// `AsyncRead` (console input, tests).
///
/// Feed raw chunks with [`extend`](Self::extend), then drain complete lines
/// with [`next_line`](Self::next_line). Anything after the last newline stays
/// buffered for the next chunk.
#[derive(Debug, Default)]
pub struct LineScanner {
    buf: BytesMut,
}

impl LineScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete line, with the trailing `\n` (and optional `\r`)
    /// stripped. Returns `None` while only a partial line is buffered.
    pub fn next_line(&mut self) -> Option<Bytes> {
        let i = memchr(b'\n', &self.buf)?;
        Some(strip_eol(self.buf.split_to(i + 1).freeze()))
    }

    /// Drop any buffered partial line.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
