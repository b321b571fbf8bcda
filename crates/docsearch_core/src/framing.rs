use crate::{ClientError, FailureKind, StreamEvent};

const DATA_PREFIX: &str = "data:";
const PREVIEW_CHARS: usize = 80;

/// Reassembles `data: {json}` lines from arbitrarily split byte chunks.
///
/// Bytes are buffered rather than text so that a multi-byte character split
/// across two chunks is decoded only once the whole line is present.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

pub type Framed = Result<StreamEvent, ClientError>;

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every event completed by it, in order.
    /// Blank and non-data lines yield nothing; malformed data lines yield a
    /// `Protocol` error for the caller to log and skip.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Framed> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            if let Some(frame) = parse_line(&self.buffer[consumed..end]) {
                frames.push(frame);
            }
            consumed = end + 1;
        }
        self.buffer.drain(..consumed);
        frames
    }

    /// Flushes an unterminated trailing line at end of input.
    pub fn finish(&mut self) -> Option<Framed> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }

    /// Bytes of the partial line carried over to the next chunk.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_line(raw: &[u8]) -> Option<Framed> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line,
        Err(err) => {
            return Some(Err(ClientError::new(
                FailureKind::Protocol,
                format!("stream line is not utf-8: {err}"),
            )))
        }
    };
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(payload).map_err(|err| {
        ClientError::new(
            FailureKind::Protocol,
            format!("malformed stream event ({err}): {}", preview(payload)),
        )
    }))
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().nth(PREVIEW_CHARS).is_some() {
        out.push('…');
    }
    out
}
