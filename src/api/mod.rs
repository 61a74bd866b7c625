pub mod chat;
pub mod document;

pub use chat::{ChatStreamSource, EventStream, HttpChatSource};
pub use document::{generate_document, DocumentFormat};
