//! Plays a recorded event-stream transcript back as a chat turn.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{ChatStreamSource, EventStream};
use crate::errors::AppError;
use crate::models::ChatRequest;
use crate::sse::{SseDecoder, StreamEvent};

/// A [`ChatStreamSource`] that serves the same recorded events on every turn.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    events: Vec<StreamEvent>,
    delay: Option<Duration>,
}

impl ReplaySource {
    /// Frames `transcript` exactly as a live response body would be.
    pub fn new(transcript: &str) -> Self {
        let mut decoder = SseDecoder::new();
        let mut events = decoder.push(transcript.as_bytes());
        events.extend(decoder.finish());
        debug!(events = events.len(), "Loaded replay transcript");
        Self { events, delay: None }
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let transcript = tokio::fs::read_to_string(path).await?;
        info!(path = %path.display(), "Replaying recorded transcript");
        Ok(Self::new(&transcript))
    }

    /// Pauses before each event to mimic a live stream.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay).filter(|d| !d.is_zero());
        self
    }

    pub fn events(&self) -> &[StreamEvent] {
        &self.events
    }
}

impl ChatStreamSource for ReplaySource {
    fn open(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<EventStream, AppError> {
        debug!(thread_id = %request.thread_id, events = self.events.len(), "Opening replay stream");
        let delay = self.delay;
        let events = futures_util::stream::iter(self.events.clone());

        let Some(delay) = delay else {
            return Ok(events.map(Ok).boxed());
        };
        Ok(events
            .then(move |event| {
                let cancel = cancel.clone();
                async move {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(AppError::Cancelled),
                        _ = tokio::time::sleep(delay) => Ok(event),
                    }
                }
            })
            .boxed())
    }
}
