//! Bounded capture of child-process output.
//!
//! A collector keeps at most `max_bytes` bytes and at most `max_lines` lines,
//! whichever limit is reached first. Once a limit is hit the rest of the
//! input is discarded, but callers keep feeding it so the producer never
//! blocks on a full pipe.

use std::io;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

// Maximum we keep for each stream, which is either:
// - 10KiB OR
// - 256 lines
pub const MAX_STREAM_OUTPUT: usize = 10 * 1024;
pub const MAX_STREAM_OUTPUT_LINES: usize = 256;

const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone)]
pub struct OutputCollector {
    buf: Vec<u8>,
    remaining_bytes: usize,
    remaining_lines: usize,
    max_lines: usize,
    hit: bool,
}

impl OutputCollector {
    pub fn new(max_bytes: usize, max_lines: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_bytes.min(READ_CHUNK)),
            remaining_bytes: max_bytes,
            remaining_lines: max_lines,
            max_lines,
            hit: max_bytes == 0 || max_lines == 0,
        }
    }

    /// Feed the next chunk of output. Bytes past either limit are dropped.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.hit || chunk.is_empty() {
            return;
        }

        let mut copy_len = 0;
        for &b in chunk {
            if self.remaining_bytes == 0 || self.remaining_lines == 0 {
                self.hit = true;
                break;
            }
            copy_len += 1;
            self.remaining_bytes -= 1;
            if b == b'\n' {
                self.remaining_lines -= 1;
            }
        }
        self.buf.extend_from_slice(&chunk[..copy_len]);
    }

    /// Whether any output was discarded (or a limit was zero to begin with).
    pub fn hit(&self) -> bool {
        self.hit
    }

    /// Number of complete lines retained so far.
    pub fn lines_kept(&self) -> usize {
        self.max_lines - self.remaining_lines
    }

    /// The retained output decoded as UTF-8 (lossy). Safe to call at any
    /// point, including while output is still arriving.
    pub fn get_string(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }

    pub fn into_stream_output(self) -> StreamOutput<String> {
        StreamOutput {
            text: self.get_string(),
            truncated_after_lines: if self.hit {
                Some(self.lines_kept() as u32)
            } else {
                None
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutput<T> {
    pub text: T,
    pub truncated_after_lines: Option<u32>,
}

impl StreamOutput<String> {
    pub fn new(text: String) -> Self {
        Self {
            text,
            truncated_after_lines: None,
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated_after_lines.is_some()
    }
}

/// Reads `reader` to EOF through an [`OutputCollector`]. Reading continues
/// after the caps are hit to avoid back-pressure on the writer.
pub async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
    max_lines: usize,
) -> io::Result<StreamOutput<String>> {
    let mut collector = OutputCollector::new(max_bytes, max_lines);
    let mut tmp = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        collector.push(&tmp[..n]);
    }

    Ok(collector.into_stream_output())
}
