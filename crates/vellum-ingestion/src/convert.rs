//! Converter service client — normalizes external parser output into the
//! canonical `Document` form.
//!
//! The service owns all format parsing (PDF/HTML/DOCX/…, OCR, table
//! structure); this adapter's contract is only: valid local file in,
//! non-empty canonical text out, or `ConversionFailed`.

use std::path::Path;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, instrument};

use vellum_common::PipelineError;
use vellum_config::ConverterConfig;

use crate::models::Document;

const CONVERT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

/// Client for the external document-converter service.
#[derive(Debug)]
pub struct ConverterClient {
    base_url: String,
    ocr: bool,
    table_structure: bool,
    client: Client,
}

/// Conversion response from the service.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct ConvertResponse {
    text: String,
    page_count: Option<u32>,
    title: Option<String>,
}

impl ConverterClient {
    pub fn new(cfg: &ConverterConfig) -> Self {
        Self {
            base_url: cfg.url.trim_end_matches('/').to_string(),
            ocr: cfg.ocr,
            table_structure: cfg.table_structure,
            client: Client::builder()
                .timeout(CONVERT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    /// Check if the converter service is healthy.
    pub async fn health_check(&self) -> anyhow::Result<bool> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    /// Convert a local file into the canonical document form.
    #[instrument(skip(self), fields(file = %file_path.display()))]
    pub async fn convert(
        &self,
        file_path: &Path,
        source: &str,
    ) -> Result<Document, PipelineError> {
        let file_bytes = fs::read(file_path)
            .await
            .map_err(|e| PipelineError::ConversionFailed(format!("read {}: {e}", file_path.display())))?;
        let filename = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.pdf")
            .to_string();

        let part = reqwest::multipart::Part::bytes(file_bytes).file_name(filename);
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(format!(
                "{}/convert?ocr={}&table_structure={}",
                self.base_url, self.ocr, self.table_structure
            ))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::ConversionFailed(format!("converter unreachable: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(PipelineError::ConversionFailed(format!(
                "converter returned {status}: {detail}"
            )));
        }

        let body: ConvertResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::ConversionFailed(format!("bad converter response: {e}")))?;

        if body.text.trim().is_empty() {
            return Err(PipelineError::ConversionFailed(
                "converter produced empty text".to_string(),
            ));
        }

        info!(
            source,
            chars = body.text.len(),
            pages = ?body.page_count,
            "document converted"
        );

        Ok(Document {
            source: source.to_string(),
            text: body.text,
            page_count: body.page_count,
            title: body.title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_service_is_conversion_failed() {
        let cfg = ConverterConfig {
            // Port 1 is never bound; connection is refused immediately.
            url: "http://127.0.0.1:1".to_string(),
            ocr: true,
            table_structure: true,
        };
        let client = ConverterClient::new(&cfg);

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.pdf");
        std::fs::write(&file, b"%PDF-1.4").unwrap();

        let err = client.convert(&file, "doc.pdf").await.unwrap_err();
        assert!(matches!(err, PipelineError::ConversionFailed(_)));
    }

    #[tokio::test]
    async fn missing_input_file_is_conversion_failed() {
        let client = ConverterClient::new(&ConverterConfig::default());
        let err = client
            .convert(Path::new("/nonexistent/doc.pdf"), "doc.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ConversionFailed(_)));
    }
}
