//! Source resolution — turns a job's source identifier into a local
//! readable file plus a cleanup obligation.
//!
//! Cleanup is Drop-based so it runs on every exit path of an attempt:
//! success, caught failure, and forced termination (the attempt future
//! being dropped by the hard timeout drops the guard with it).

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use tempfile::TempPath;
use tracing::{debug, info, warn};
use url::Url;

use vellum_common::PipelineError;

use crate::models::SourceKind;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
/// How much of the body to inspect when sniffing for an HTML signature.
const SNIFF_WINDOW: usize = 1000;

/// A locally readable copy of a job's source document.
///
/// Holding the value keeps the file alive; dropping it releases the
/// temp resource according to the source kind.
#[derive(Debug)]
pub struct ResolvedSource {
    pub path: PathBuf,
    _guard: CleanupGuard,
}

#[derive(Debug)]
enum CleanupGuard {
    /// Downloaded to a uniquely named temp file; deleted unconditionally
    /// on drop by `TempPath`.
    Temp(#[allow(dead_code)] TempPath),
    /// Upload materialized by the API process in the shared directory;
    /// deleted on drop only if it still resides under that directory.
    Shared { path: PathBuf, shared_root: PathBuf },
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let CleanupGuard::Shared { path, shared_root } = self {
            if !is_under(path, shared_root) {
                warn!(path = %path.display(), "refusing to delete file outside shared dir");
                return;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "cleaned up shared upload"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to delete shared upload"),
            }
        }
    }
}

/// Safety check against deleting arbitrary paths: the file must resolve
/// to a location under the configured shared directory.
fn is_under(path: &Path, root: &Path) -> bool {
    let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    match path.canonicalize() {
        Ok(p) => p.starts_with(&canonical_root),
        // Already gone or unresolvable; nothing safe to delete.
        Err(_) => false,
    }
}

/// Resolves URL and shared-file sources into local files.
#[derive(Debug)]
pub struct SourceResolver {
    client: Client,
    shared_root: PathBuf,
}

impl SourceResolver {
    pub fn new(shared_temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::builder()
                .timeout(DOWNLOAD_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            shared_root: shared_temp_dir.into(),
        }
    }

    /// Produce a local file for the given source.
    /// Each attempt resolves fresh; a retry never reuses a prior
    /// attempt's temp file.
    pub async fn resolve(
        &self,
        kind: SourceKind,
        source: &str,
    ) -> Result<ResolvedSource, PipelineError> {
        match kind {
            SourceKind::Url => self.download(source).await,
            SourceKind::File => {
                let path = PathBuf::from(source);
                if !path.exists() {
                    return Err(PipelineError::SourceUnavailable(format!(
                        "file not found: {source}"
                    )));
                }
                Ok(ResolvedSource {
                    path: path.clone(),
                    _guard: CleanupGuard::Shared {
                        path,
                        shared_root: self.shared_root.clone(),
                    },
                })
            }
        }
    }

    async fn download(&self, url: &str) -> Result<ResolvedSource, PipelineError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("fetch {url}: {e}")))?
            .error_for_status()
            .map_err(|e| PipelineError::SourceUnavailable(format!("fetch {url}: {e}")))?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_ascii_lowercase());

        let body = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("read body of {url}: {e}")))?;

        let suffix = classify_suffix(content_type.as_deref(), url, &body);
        debug!(url, suffix, bytes = body.len(), "downloaded source");

        let mut file = tempfile::Builder::new()
            .prefix("vellum-")
            .suffix(suffix)
            .tempfile()
            .map_err(|e| PipelineError::SourceUnavailable(format!("create temp file: {e}")))?;
        std::io::Write::write_all(&mut file, &body)
            .map_err(|e| PipelineError::SourceUnavailable(format!("write temp file: {e}")))?;

        let temp_path = file.into_temp_path();
        let path = temp_path.to_path_buf();
        info!(url, path = %path.display(), "source materialized");

        Ok(ResolvedSource {
            path,
            _guard: CleanupGuard::Temp(temp_path),
        })
    }
}

/// Pick a file suffix for the downloaded body so the converter can
/// identify the format. Header first, then URL path extension, then a
/// sniff of the first bytes, then a binary-document default.
fn classify_suffix(content_type: Option<&str>, url: &str, body: &[u8]) -> &'static str {
    if let Some(ct) = content_type {
        if ct.contains("html") {
            return ".html";
        }
        if ct.contains("pdf") {
            return ".pdf";
        }
        if ct.contains("markdown") {
            return ".md";
        }
    }

    if let Ok(parsed) = Url::parse(url) {
        match Path::new(parsed.path())
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("pdf")           => return ".pdf",
            Some("html") | Some("htm") => return ".html",
            Some("md")            => return ".md",
            Some("docx")          => return ".docx",
            Some("pptx")          => return ".pptx",
            Some("txt")           => return ".txt",
            _ => {}
        }
    }

    let preview = String::from_utf8_lossy(&body[..body.len().min(SNIFF_WINDOW)]).to_lowercase();
    if preview.contains("<html") || preview.contains("<!doctype html") {
        ".html"
    } else {
        ".pdf"
    }
}
