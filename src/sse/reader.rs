use std::collections::VecDeque;
use std::time::Duration;

use futures_util::Stream;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use reqwest::{Response, Url};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReconnectPolicy;
use crate::errors::AppError;
use crate::sse::parser::{SseDecoder, StreamEvent};

/// Long-lived streaming POST that reconnects on transient failures.
///
/// The reader owns the HTTP response while a connection is open; it is
/// dropped as soon as the connection ends for any reason, which returns the
/// socket to the pool or closes it.
pub struct EventStreamReader {
    client: reqwest::Client,
    url: Url,
    body: Vec<u8>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    attempt: u32,
    response: Option<Response>,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
    retry_after: Option<Duration>,
    failure: Option<AppError>,
    finished: bool,
    event_count: usize,
}

impl EventStreamReader {
    pub fn new(
        client: reqwest::Client,
        url: Url,
        body: &impl Serialize,
        policy: ReconnectPolicy,
        cancel: CancellationToken,
    ) -> Result<Self, AppError> {
        Ok(Self {
            client,
            url,
            body: serde_json::to_vec(body)?,
            policy,
            cancel,
            attempt: 0,
            response: None,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            retry_after: None,
            failure: None,
            finished: false,
            event_count: 0,
        })
    }

    /// Next decoded event, `Ok(None)` once the server closed the stream.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>, AppError> {
        loop {
            if self.cancel.is_cancelled() && (!self.finished || !self.pending.is_empty()) {
                return Err(self.abort());
            }
            if let Some(event) = self.pending.pop_front() {
                self.event_count += 1;
                return Ok(Some(event));
            }
            if let Some(err) = self.failure.take() {
                self.finished = true;
                return Err(err);
            }
            if self.finished {
                return Ok(None);
            }

            if let Some(delay) = self.retry_after.take() {
                let cancelled = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => true,
                    _ = tokio::time::sleep(delay) => false,
                };
                if cancelled {
                    return Err(self.abort());
                }
            }

            if self.response.is_none() {
                match self.connect().await {
                    Ok(response) => {
                        info!(url = %self.url, "SSE connection established");
                        self.attempt = 0;
                        self.response = Some(response);
                    }
                    Err(AppError::Cancelled) => return Err(self.abort()),
                    Err(err) => {
                        error!(url = %self.url, "Connection error: {err}");
                        self.schedule_retry(err);
                    }
                }
                continue;
            }

            match self.read_chunk().await {
                Ok(Some(chunk)) => {
                    let events = self.decoder.push(&chunk);
                    self.pending.extend(events);
                }
                Ok(None) => {
                    self.release();
                    self.pending.extend(self.decoder.finish());
                    self.finished = true;
                    info!(
                        events = self.event_count + self.pending.len(),
                        "Stream completed normally"
                    );
                }
                Err(AppError::Cancelled) => return Err(self.abort()),
                Err(err) => {
                    error!(
                        events = self.event_count,
                        buffered = self.decoder.buffered_len(),
                        "SSE stream error: {err}"
                    );
                    self.release();
                    self.pending.extend(self.decoder.finish());
                    self.schedule_retry(err);
                }
            }
        }
    }

    /// Exposes the reader as a lazy stream that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamEvent, AppError>> + Send + 'static {
        futures_util::stream::unfold(Some(self), |reader| async move {
            let mut reader = reader?;
            match reader.next_event().await {
                Ok(Some(event)) => Some((Ok(event), Some(reader))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    fn schedule_retry(&mut self, err: AppError) {
        if !err.is_retryable() {
            self.failure = Some(err);
            return;
        }
        if self.attempt >= self.policy.max_attempts {
            self.failure = Some(AppError::ReconnectExhausted {
                attempts: self.policy.max_attempts,
                last_error: Box::new(err),
            });
            return;
        }
        self.attempt += 1;
        let delay = self.policy.backoff(self.attempt);
        warn!(
            attempt = self.attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Retryable stream error, reconnecting"
        );
        self.retry_after = Some(delay);
    }

    async fn connect(&self) -> Result<Response, AppError> {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("_", &chrono::Utc::now().timestamp_millis().to_string());

        debug!(
            attempt = self.attempt + 1,
            max = self.policy.max_attempts + 1,
            %url,
            "Starting SSE connection"
        );

        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(CACHE_CONTROL, "no-cache, no-store, must-revalidate")
            .header(PRAGMA, "no-cache")
            .header(ACCEPT, "text/event-stream")
            .header("X-Accel-Buffering", "no")
            .body(self.body.clone());

        let timeout = self.policy.connect_timeout;
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
            sent = tokio::time::timeout(timeout, request.send()) => match sent {
                Err(_) => return Err(AppError::Timeout { after: timeout }),
                Ok(result) => result.map_err(|e| AppError::from_transport(e, timeout))?,
            },
        };

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }
        Ok(response)
    }

    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, AppError> {
        let Some(response) = self.response.as_mut() else {
            return Ok(None);
        };
        let idle = self.policy.idle_timeout;
        let read = async {
            match idle {
                Some(limit) => match tokio::time::timeout(limit, response.chunk()).await {
                    Ok(result) => result.map_err(|e| AppError::from_transport(e, limit)),
                    Err(_) => Err(AppError::Timeout { after: limit }),
                },
                None => response
                    .chunk()
                    .await
                    .map_err(|e| AppError::from_transport(e, Duration::ZERO)),
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AppError::Cancelled),
            chunk = read => chunk.map(|bytes| bytes.map(|b| b.to_vec())),
        }
    }

    fn release(&mut self) {
        if self.response.take().is_some() {
            debug!(events = self.event_count, "SSE connection resources released");
        }
    }

    fn abort(&mut self) -> AppError {
        self.release();
        self.pending.clear();
        self.failure = None;
        self.retry_after = None;
        self.finished = true;
        info!(events = self.event_count, "SSE stream cancelled");
        AppError::Cancelled
    }
}
