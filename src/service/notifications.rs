use tokio::sync::mpsc;
use tracing::{debug, error};

/// Everything needed to run a failed turn again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTurn {
    pub content: Option<String>,
    pub interrupt_feedback: Option<String>,
}

/// A dismissible, user-facing failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    /// Absent when the user cancelled the turn.
    pub retry: Option<RetryTurn>,
}

/// Sink for user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl Notifier for mpsc::UnboundedSender<Notification> {
    fn notify(&self, notification: Notification) {
        if self.send(notification).is_err() {
            debug!("Notification dropped, receiver closed");
        }
    }
}

/// Reports notifications through the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        error!(
            message = %notification.message,
            retryable = notification.retry.is_some(),
            "Chat turn failed"
        );
    }
}
