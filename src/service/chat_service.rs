use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::ChatStreamSource;
use crate::config::TurnRetryPolicy;
use crate::errors::AppError;
use crate::events::ChatEvent;
use crate::merge::{merge_message, message_from_event};
use crate::models::{ChatRequest, Message};
use crate::service::notifications::{Notification, Notifier, RetryTurn};
use crate::settings::SettingsStore;
use crate::store::ConversationStore;

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub interrupt_feedback: Option<String>,
}

/// Drives chat turns: opens the stream, folds its events into the store and
/// reports failures.
#[derive(Clone)]
pub struct ChatService {
    store: ConversationStore,
    source: Arc<dyn ChatStreamSource>,
    settings: Arc<dyn SettingsStore>,
    notifier: Arc<dyn Notifier>,
    retry: TurnRetryPolicy,
}

impl ChatService {
    pub fn new(
        store: ConversationStore,
        source: Arc<dyn ChatStreamSource>,
        settings: Arc<dyn SettingsStore>,
        notifier: Arc<dyn Notifier>,
        retry: TurnRetryPolicy,
    ) -> Self {
        Self { store, source, settings, notifier, retry }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Runs one turn. `content` of `None` replays the thread.
    ///
    /// Failures are reported through the notifier before being returned.
    pub async fn send(
        &self,
        content: Option<&str>,
        options: SendOptions,
        cancel: CancellationToken,
    ) -> Result<(), AppError> {
        if let Some(content) = content {
            self.store
                .append_message(Message::user(self.store.thread_id(), content));
        }
        let turn = RetryTurn {
            content: content.map(str::to_string),
            interrupt_feedback: options.interrupt_feedback,
        };
        self.drive(&turn, &cancel).await
    }

    /// Runs a failed turn again without repeating its user message.
    pub async fn retry(&self, turn: &RetryTurn, cancel: CancellationToken) -> Result<(), AppError> {
        info!(thread_id = %self.store.thread_id(), "Retrying chat turn");
        self.drive(turn, &cancel).await
    }

    async fn drive(&self, turn: &RetryTurn, cancel: &CancellationToken) -> Result<(), AppError> {
        let _guard = TurnGuard::start(&self.store);
        let mut in_flight = None;

        let result = self.run_with_retry(turn, cancel, &mut in_flight).await;
        if let Err(err) = &result {
            self.report_failure(err, turn, in_flight.as_deref());
        }
        result
    }

    async fn run_with_retry(
        &self,
        turn: &RetryTurn,
        cancel: &CancellationToken,
        in_flight: &mut Option<String>,
    ) -> Result<(), AppError> {
        let mut attempt = 1;
        loop {
            match self.run_turn(turn, cancel, in_flight).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_network() && attempt < self.retry.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %err,
                        "Chat turn failed, retrying"
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AppError::Cancelled),
                        _ = tokio::time::sleep(self.retry.delay) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_turn(
        &self,
        turn: &RetryTurn,
        cancel: &CancellationToken,
        in_flight: &mut Option<String>,
    ) -> Result<(), AppError> {
        let request = ChatRequest::new(
            &self.store.thread_id(),
            turn.content.as_deref(),
            turn.interrupt_feedback.clone(),
            &self.settings.snapshot(),
        );
        let mut stream = self.source.open(&request, cancel.clone())?;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                next = stream.next() => next,
            };
            let Some(raw) = next else {
                return Ok(());
            };
            let raw = raw?;

            let event = match ChatEvent::decode(&raw) {
                Ok(event) => event,
                Err(err) => {
                    warn!(event = %raw.event, error = %err, "Dropping undecodable event");
                    continue;
                }
            };
            if let Some(id) = self.apply_event(&event, turn.interrupt_feedback.as_deref()) {
                *in_flight = Some(id);
            }
        }
    }

    /// Merges one event into the store, returning the id of the message it
    /// landed on.
    fn apply_event(&self, event: &ChatEvent, interrupt_feedback: Option<&str>) -> Option<String> {
        // ── Resolve target message ────────────────────────────────────────────
        let owner = match event {
            ChatEvent::ToolCallResult(result) => self.store.read(|state| {
                state
                    .find_message_by_tool_call_id(&result.tool_call_id)
                    .cloned()
            }),
            _ => None,
        };

        let message = match owner.or_else(|| self.store.message(event.message_id())) {
            Some(message) => message,
            None if matches!(event, ChatEvent::ToolCallResult(_)) => {
                debug!(message_id = event.message_id(), "Tool result without owner dropped");
                return None;
            }
            None => {
                let message = message_from_event(event, interrupt_feedback.map(str::to_string));
                self.store.append_message(message.clone());
                message
            }
        };

        // ── Merge ─────────────────────────────────────────────────────────────
        let merged = merge_message(Some(message), event);
        let id = merged.id.clone();
        self.store.update_message(merged);
        Some(id)
    }

    fn report_failure(&self, err: &AppError, turn: &RetryTurn, in_flight: Option<&str>) {
        let message = err.user_message();
        error!(
            error = %err,
            message_id = ?in_flight,
            thread_id = %self.store.thread_id(),
            "Chat stream error"
        );

        self.notifier.notify(Notification {
            message: message.clone(),
            retry: (!err.is_cancelled()).then(|| turn.clone()),
        });

        let Some(mut failed) = in_flight.and_then(|id| self.store.message(id)) else {
            return;
        };
        if failed.is_streaming {
            failed.is_streaming = false;
            failed.error = Some(message);
            self.store.update_message(failed);
        }
    }
}

/// Marks the store as responding for the lifetime of a turn.
///
/// Dropping it clears `responding` and the ongoing research, also when the
/// turn future itself is dropped.
struct TurnGuard<'a> {
    store: &'a ConversationStore,
}

impl<'a> TurnGuard<'a> {
    fn start(store: &'a ConversationStore) -> Self {
        store.set_responding(true);
        Self { store }
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.store.set_ongoing_research(None);
        self.store.set_responding(false);
    }
}
