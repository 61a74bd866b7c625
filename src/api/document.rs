use serde::Serialize;
use tracing::{error, info};

use crate::config::ClientConfig;
use crate::errors::AppError;

/// Export formats offered by the document endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Markdown,
}

impl DocumentFormat {
    pub fn endpoint(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "document/generate-pdf",
            DocumentFormat::Markdown => "document/generate-md",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Markdown => "md",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "PDF",
            DocumentFormat::Markdown => "Markdown",
        }
    }

    /// Value recorded in the document message.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Markdown => "markdown",
        }
    }
}

impl std::str::FromStr for DocumentFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "md" | "markdown" => Ok(DocumentFormat::Markdown),
            other => Err(AppError::Unexpected(format!("Unknown document format: {other}"))),
        }
    }
}

#[derive(Serialize)]
struct DocumentRequest<'a> {
    content: &'a str,
}

/// Renders `content` through the backend and returns the document bytes.
///
/// The whole exchange shares `config.document_timeout`.
pub async fn generate_document(
    client: &reqwest::Client,
    config: &ClientConfig,
    format: DocumentFormat,
    content: &str,
) -> Result<Vec<u8>, AppError> {
    let url = config.service_url(format.endpoint())?;
    let timeout = config.document_timeout;
    info!(format = format.label(), %url, "Requesting document generation");

    let exchange = async {
        let response = client
            .post(url)
            .json(&DocumentRequest { content })
            .send()
            .await
            .map_err(|e| AppError::from_transport(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let details = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error details".to_string());
            error!(format = format.label(), status = status.as_u16(), %details, "Document generation failed");
            return Err(AppError::DocumentFailed { status: status.as_u16(), details });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::from_transport(e, timeout))?;
        Ok(bytes.to_vec())
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            error!(format = format.label(), timeout_ms = timeout.as_millis() as u64, "Document generation timed out");
            Err(AppError::DocumentTimeout { format: format.label().to_string() })
        }
    }
}
