//! Event-stream transport: framing decoder and reconnecting reader.

pub mod parser;
pub mod reader;

pub use parser::{parse_block, SseDecoder, StreamEvent};
pub use reader::EventStreamReader;
