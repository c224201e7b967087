//! Line-delimited frame reader for the `data: <payload>` event stream.
//!
//! Network chunks arrive at arbitrary boundaries: a chunk may end in the middle
//! of a line, or even in the middle of a multi-byte UTF-8 sequence. The reader
//! buffers raw bytes and only decodes a line once its `\n` terminator has been
//! seen, so neither case can corrupt a payload.

/// Field prefix every payload-carrying line starts with.
pub const DATA_PREFIX: &str = "data: ";

/// Payload value that terminates the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One protocol unit extracted from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload of a `data: ` line, prefix removed.
    Data(String),
    /// The `[DONE]` sentinel. Nothing follows it.
    Done,
}

#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
    finished: bool,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the sentinel has been read; later input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Append a chunk and return every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            if let Some(frame) = self.parse_line(&line[..line.len() - 1]) {
                frames.push(frame);
                if self.finished {
                    self.buffer.clear();
                    break;
                }
            }
        }

        frames
    }

    /// Graceful close: emit the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        if rest.is_empty() {
            return None;
        }
        self.parse_line(&rest)
    }

    fn parse_line(&mut self, raw: &[u8]) -> Option<Frame> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');
        let payload = line.strip_prefix(DATA_PREFIX)?;

        if payload == DONE_SENTINEL {
            self.finished = true;
            return Some(Frame::Done);
        }
        Some(Frame::Data(payload.to_string()))
    }
}
