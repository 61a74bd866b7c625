use std::path::PathBuf;

use serde_json::json;
use tracing::{error, info, warn};

use crate::api::document::{generate_document, DocumentFormat};
use crate::config::ClientConfig;
use crate::errors::AppError;
use crate::models::{Agent, Message};
use crate::store::ConversationStore;

/// Exports finished research reports as documents on disk.
#[derive(Clone)]
pub struct DocumentService {
    client: reqwest::Client,
    config: ClientConfig,
    store: ConversationStore,
}

impl DocumentService {
    pub fn new(client: reqwest::Client, config: ClientConfig, store: ConversationStore) -> Self {
        Self { client, config, store }
    }

    /// Generates the research report in `format` and writes it to the
    /// download directory, returning the written path.
    ///
    /// The request and its outcome are recorded in the conversation as a user
    /// message followed by a `document` agent message.
    pub async fn download_research(
        &self,
        research_id: &str,
        format: DocumentFormat,
    ) -> Result<PathBuf, AppError> {
        // ── Preconditions ─────────────────────────────────────────────────────
        if self.store.is_responding() {
            warn!(format = format.label(), "Document requested while a response is in progress");
            return Err(AppError::TurnInProgress);
        }

        let (title, report) = self.store.read(|state| {
            state.research(research_id)?;
            let report = state
                .research_report_message(research_id)
                .map(|message| message.content.clone())
                .unwrap_or_default();
            Some((state.research_title(research_id), report))
        })
        .ok_or_else(|| AppError::ResearchNotFound { id: research_id.to_string() })?;

        if report.is_empty() {
            return Err(AppError::ReportNotReady { id: research_id.to_string() });
        }

        // ── Record the request ────────────────────────────────────────────────
        let thread_id = self.store.thread_id();
        self.store.append_message(Message::user(
            &thread_id,
            format!("Please generate a {} document for the above research.", format.label()),
        ));

        let document = json!({
            "title": title,
            "researchId": research_id,
            "format": format.as_str(),
        });
        let mut message = Message::assistant(uuid::Uuid::new_v4().to_string(), &thread_id, Some(Agent::Document));
        message.content = document.to_string();
        self.store.append_message(message.clone());

        // ── Generate and save ─────────────────────────────────────────────────
        info!(research_id, format = format.label(), "Starting document generation");
        let outcome = match generate_document(&self.client, &self.config, format, &report).await {
            Ok(bytes) => self.save(&title, format, &bytes).await,
            Err(err) => Err(err),
        };

        let mut document = document;
        message.is_streaming = false;
        match &outcome {
            Ok(path) => {
                document["path"] = json!(path.display().to_string());
                info!(research_id, path = %path.display(), "Document saved");
            }
            Err(err) => {
                document["error"] = json!(err.to_string());
                message.error = Some(err.to_string());
                error!(research_id, error = %err, "Document generation failed");
            }
        }
        message.content = document.to_string();
        self.store.update_message(message);

        outcome
    }

    async fn save(&self, title: &str, format: DocumentFormat, bytes: &[u8]) -> Result<PathBuf, AppError> {
        tokio::fs::create_dir_all(&self.config.download_dir).await?;
        let path = self
            .config
            .download_dir
            .join(format!("{}.{}", sanitize_filename(title), format.extension()));
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

/// Replaces every non-alphanumeric ASCII character with `_` and lowercases.
pub fn sanitize_filename(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}
