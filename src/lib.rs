pub mod api;
pub mod config;
pub mod errors;
pub mod events;
pub mod merge;
pub mod models;
pub mod replay;
pub mod service;
pub mod settings;
pub mod sse;
pub mod store;

pub use config::ClientConfig;
pub use errors::AppError;
pub use service::{ChatService, DocumentService};
pub use store::ConversationStore;
