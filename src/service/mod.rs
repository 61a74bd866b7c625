pub mod chat_service;
pub mod document_service;
pub mod notifications;

pub use chat_service::{ChatService, SendOptions};
pub use document_service::{sanitize_filename, DocumentService};
pub use notifications::{LogNotifier, Notification, Notifier, RetryTurn};
