use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::debug;
use url::Url;

use crate::cli::config::OutputSettings;
use crate::orchestrator::task::UrlOutcome;

/// Side channel for accepted pages
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Store an accepted outcome; returns where it went, if anywhere
    async fn store(&self, outcome: &UrlOutcome) -> Result<Option<PathBuf>>;
}

/// Factory for the configured sink
pub struct RawStorage;

impl RawStorage {
    /// `None` when outputs are not being saved
    pub fn create(settings: &OutputSettings) -> Option<Arc<dyn OutputSink>> {
        if settings.save_outputs {
            Some(Arc::new(FilesystemSink::new(&settings.output_dir)))
        } else {
            None
        }
    }
}

/// Writes each accepted page to its own HTML file
pub struct FilesystemSink {
    output_dir: PathBuf,
}

impl FilesystemSink {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// `{tier}_{host}_{path}[_{query}]_{unix_ts}.html`
    pub fn file_name(outcome: &UrlOutcome, timestamp: i64) -> String {
        let tier = outcome.method.map_or("unknown", |t| t.as_str());

        let (host, path, query) = match Url::parse(&outcome.url) {
            Ok(url) => (
                url.host_str().unwrap_or("unknown").to_string(),
                url.path().trim_matches('/').to_string(),
                url.query().map(|q| q.to_string()),
            ),
            Err(_) => (outcome.url.clone(), String::new(), None),
        };

        let path = if path.is_empty() {
            "index".to_string()
        } else {
            path
        };

        let mut stem = format!("{}_{}_{}", tier, host, path);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            stem.push('_');
            stem.push_str(&query);
        }

        format!("{}_{}.html", sanitize(&stem), timestamp)
    }
}

static RE_UNSAFE_CHARS: OnceLock<Option<Regex>> = OnceLock::new();

fn sanitize(name: &str) -> String {
    let unsafe_chars = RE_UNSAFE_CHARS.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").ok());
    let cleaned = match unsafe_chars {
        Some(re) => re.replace_all(name, "_").into_owned(),
        None => name.to_string(),
    };
    cleaned.chars().take(180).collect()
}

#[async_trait]
impl OutputSink for FilesystemSink {
    async fn store(&self, outcome: &UrlOutcome) -> Result<Option<PathBuf>> {
        let Some(html) = outcome.html.as_deref() else {
            return Ok(None);
        };

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .context(format!(
                "Failed to create output directory: {}",
                self.output_dir.display()
            ))?;

        let path = self
            .output_dir
            .join(Self::file_name(outcome, Utc::now().timestamp()));
        tokio::fs::write(&path, html)
            .await
            .context(format!("Failed to write output file: {}", path.display()))?;

        debug!("Saved {} to {}", outcome.url, path.display());

        Ok(Some(path))
    }
}
