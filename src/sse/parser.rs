//! Incremental decoder for the `text/event-stream` framing used by the backend.

use tracing::trace;

const DEFAULT_EVENT: &str = "message";
const DELIMITER: &str = "\n\n";

/// One framed event as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub event: String,
    pub data: String,
}

/// Buffers raw bytes and hands out every complete event block.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a body chunk and returns the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.decode_utf8(chunk);

        let mut parts: Vec<&str> = self.buffer.split(DELIMITER).collect();
        let remainder = parts.pop().unwrap_or_default().to_string();
        let events = parts
            .into_iter()
            .filter(|part| !part.trim().is_empty())
            .filter_map(parse_block)
            .collect();
        self.buffer = remainder;
        events
    }

    /// Flushes whatever is left once the stream closed; resets the decoder.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            return None;
        }
        parse_block(&rest)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.pending.len()
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        let bytes = std::mem::take(&mut self.pending);
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            trace!(len, "Replacing invalid UTF-8 in event stream");
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Parses one event block. Returns `None` for keep-alives and blocks
/// without usable fields.
pub fn parse_block(block: &str) -> Option<StreamEvent> {
    let mut event = DEFAULT_EVENT.to_string();
    let mut data: Option<String> = None;

    for line in block.split('\n') {
        if line.is_empty() {
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(data) = data.as_mut() {
                data.push('\n');
                data.push_str(&line[1..]);
                continue;
            }
        }

        let Some((field, value)) = line.split_once(": ") else {
            continue;
        };
        match field {
            "event" => event = value.to_string(),
            "data" => match data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    if data.is_none() && event == DEFAULT_EVENT {
        return None;
    }
    Some(StreamEvent { event, data: data.unwrap_or_default() })
}
