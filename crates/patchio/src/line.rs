use bytes::Bytes;
use bytes::BytesMut;
use memchr::memchr;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024;

/// Reads newline-terminated frames from an async byte stream.
///
/// The internal buffer persists across calls: a trailing partial frame is
/// retained until the rest of it arrives on a later read.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buf: BytesMut,
    max_frame_len: usize,
}

impl<R> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4 * 1024),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max.max(1);
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Read the next complete frame, stripping the trailing `\n` and an
    /// optional `\r` before it.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` for a complete frame (may be empty),
    /// - `Ok(None)` on EOF. An unterminated partial frame at EOF is
    ///   discarded: only newline-terminated frames are ever surfaced.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            if let Some(i) = memchr(b'\n', &self.buf) {
                let raw = self.buf.split_to(i + 1).freeze();
                return Ok(Some(strip_eol(raw)));
            }

            if self.buf.len() > self.max_frame_len {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "frame too long",
                ));
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
        }
    }
}

pub(crate) fn strip_eol(mut b: Bytes) -> Bytes {
    let mut end = b.len();
    if end > 0 && b[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && b[end - 1] == b'\r' {
        end -= 1;
    }
    b.truncate(end);
    b
}
