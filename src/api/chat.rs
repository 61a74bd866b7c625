use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::errors::AppError;
use crate::models::ChatRequest;
use crate::sse::{EventStreamReader, StreamEvent};

pub type EventStream = BoxStream<'static, Result<StreamEvent, AppError>>;

/// Opens the raw event stream for one chat turn.
pub trait ChatStreamSource: Send + Sync {
    fn open(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<EventStream, AppError>;
}

/// Streams turns from the backend's `chat/stream` endpoint.
#[derive(Clone)]
pub struct HttpChatSource {
    client: reqwest::Client,
    url: Url,
    policy: ReconnectPolicy,
}

impl HttpChatSource {
    pub fn new(client: reqwest::Client, config: &ClientConfig) -> Result<Self, AppError> {
        Ok(Self {
            client,
            url: config.service_url("chat/stream")?,
            policy: config.reconnect,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl ChatStreamSource for HttpChatSource {
    fn open(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<EventStream, AppError> {
        info!(
            thread_id = %request.thread_id,
            url = %self.url,
            has_feedback = request.interrupt_feedback.is_some(),
            "Opening chat stream"
        );
        let reader = EventStreamReader::new(
            self.client.clone(),
            self.url.clone(),
            request,
            self.policy,
            cancel,
        )?;
        Ok(reader.into_stream().boxed())
    }
}
