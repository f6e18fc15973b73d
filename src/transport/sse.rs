//! Incremental decoder for upstream `text/event-stream` bodies.
//!
//! Bytes are split on `\n`; an incomplete trailing line (including a UTF-8
//! sequence cut in half by a read boundary) is held until the next push.
//! Each byte is scanned for a newline once. A line longer than the limit is
//! dropped up to its terminating newline.

/// A decoded `data:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON payload of a `data:` line.
    Data(String),
    /// The `[DONE]` marker.
    Done,
}

pub const DONE_MARKER: &str = "[DONE]";

/// Longest line held while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug)]
pub struct SseLineDecoder {
    buf: Vec<u8>,
    /// `buf[..scanned]` holds no newline.
    scanned: usize,
    max_line: usize,
    /// Skipping the rest of an oversized line.
    discarding: bool,
}

impl Default for SseLineDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    /// Feed one read; returns the frames of every line it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut input = bytes;
        if self.discarding {
            match input.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    input = &input[pos + 1..];
                }
                None => return Vec::new(),
            }
        }
        self.buf.extend_from_slice(input);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(off) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + off;
            if let Some(frame) = parse_line(&self.buf[start..end]) {
                frames.push(frame);
            }
            start = end + 1;
            self.scanned = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.max_line {
            tracing::warn!(
                held = self.buf.len(),
                limit = self.max_line,
                "dropping oversized event-stream line"
            );
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        frames
    }

    /// Decode whatever is left once the body ends or fails.
    pub fn finish(&mut self) -> Option<Frame> {
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) || self.buf.is_empty() {
            self.buf.clear();
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        parse_line(&rest)
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn parse_line(raw: &[u8]) -> Option<Frame> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        None
    } else if data == DONE_MARKER {
        Some(Frame::Done)
    } else {
        Some(Frame::Data(data.to_string()))
    }
}
