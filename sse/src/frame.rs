//! Incremental decoding of an SSE byte stream into blank-line delimited frames.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One raw SSE message: every line up to and including the terminating blank line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Iterates the frame's lines with their line terminators removed.
    pub fn lines(&self) -> impl Iterator<Item = &[u8]> {
        self.0
            .split(|b| *b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
    }
}

/// Reads frames from a buffered byte source one line at a time.
///
/// The source is never read to completion up front; the upstream feed is
/// unbounded, so only the frame currently being assembled is held in memory.
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
    finished: bool,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Returns the next complete frame, or `None` once the source is exhausted.
    ///
    /// Content still buffered at a clean end of input is returned as one final
    /// partial frame. A read error ends the sequence and discards the partial frame.
    pub async fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            let start = self.buffer.len();
            let read = match self.reader.read_until(b'\n', &mut self.buffer).await {
                Ok(read) => read,
                Err(e) => {
                    self.finished = true;
                    self.buffer.clear();
                    return Err(e);
                }
            };

            if read == 0 {
                self.finished = true;
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(Frame(std::mem::take(&mut self.buffer))));
            }

            if is_blank_line(&self.buffer[start..]) {
                return Ok(Some(Frame(std::mem::take(&mut self.buffer))));
            }
        }
    }
}

fn is_blank_line(line: &[u8]) -> bool {
    line == b"\n" || line == b"\r\n"
}
