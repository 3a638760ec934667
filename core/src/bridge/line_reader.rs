use std::io;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

const READ_CHUNK_SIZE: usize = 1024;

/// Longest line accepted; anything longer is discarded whole.
pub(crate) const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReadLine {
    Line(String),
    /// A line longer than [`MAX_LINE_BYTES`] was received and dropped up to
    /// and including its terminator.
    TooLong,
}

/// Splits a byte stream into lines terminated by `\n`, `\r` or `\r\n`.
///
/// All state lives in the reader, so a `next_line` future dropped inside
/// `select!` loses nothing.
#[derive(Debug, Default)]
pub(crate) struct LineReader {
    pending: Vec<u8>,
    /// The previous line ended in `\r`; a `\n` right after it belongs to
    /// the same terminator.
    skip_lf: bool,
    /// The current line has outgrown the limit; bytes are dropped until the
    /// next terminator.
    overflowed: bool,
}

impl LineReader {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the next line without its terminator, or `None` once the
    /// stream is closed. An unterminated tail at end-of-stream is dropped.
    pub(crate) async fn next_line<R>(&mut self, reader: &mut R) -> io::Result<Option<ReadLine>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            if self.skip_lf && !self.pending.is_empty() {
                if self.pending[0] == b'\n' {
                    self.pending.remove(0);
                }
                self.skip_lf = false;
            }

            if let Some(pos) = self
                .pending
                .iter()
                .position(|byte| *byte == b'\n' || *byte == b'\r')
            {
                self.skip_lf = self.pending[pos] == b'\r';
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                if std::mem::take(&mut self.overflowed) || pos > MAX_LINE_BYTES {
                    return Ok(Some(ReadLine::TooLong));
                }
                return Ok(Some(ReadLine::Line(
                    String::from_utf8_lossy(&line[..pos]).into_owned(),
                )));
            }

            if self.pending.len() > MAX_LINE_BYTES {
                self.pending.clear();
                self.overflowed = true;
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }
}
