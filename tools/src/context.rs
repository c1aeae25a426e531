use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Response;
use serde::Serialize;
use tokio::fs;
use tracing::info;
use workbench_core::staging::sanitize_filename;
use workbench_core::{
    download_url, DownloadRegistry, Settings, ToolError, ToolOutcome, UploadStore,
};

// Upstream error bodies are clipped before they reach a result envelope.
const MAX_ERROR_BODY_CHARS: usize = 500;

pub struct ToolContext {
    pub settings: Arc<Settings>,
    pub http: reqwest::Client,
    pub uploads: UploadStore,
    pub downloads: DownloadRegistry,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Published {
    pub filename: String,
    pub path: PathBuf,
    pub download_url: String,
    pub file_size: String,
}

impl ToolContext {
    pub fn new(settings: Arc<Settings>) -> ToolOutcome<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ToolError::internal("HTTP 客户端初始化失败", e))?;
        Ok(Self {
            uploads: UploadStore::new(&settings.uploads_dir),
            downloads: DownloadRegistry::new(&settings.downloads_dir, settings.download_ttl),
            settings,
            http,
        })
    }

    /// Writes `bytes` into the outputs directory and registers a download for them.
    /// Only the last path component of `filename` is used.
    pub async fn publish(&self, bytes: &[u8], filename: &str, mime: &str) -> ToolOutcome<Published> {
        let filename = sanitize_filename(filename);
        let dir = &self.settings.outputs_dir;
        fs::create_dir_all(dir).await?;
        let path = dir.join(&filename);
        fs::write(&path, bytes).await?;
        let token = self.downloads.register(bytes, &filename, mime).await?;

        info!(file = %filename, size = bytes.len(), "Published artifact");
        Ok(Published {
            filename,
            path,
            download_url: download_url(&token),
            file_size: format!("{:.2} KB", bytes.len() as f64 / 1024.0),
        })
    }
}

// Strips the `<millis>-` prefix the staging directory adds.
pub(crate) fn display_name(staged: &str) -> &str {
    match staged.split_once('-') {
        Some((prefix, rest)) if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => staged,
    }
}

pub(crate) fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_ERROR_BODY_CHARS {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
    clipped.push('…');
    clipped
}

// Turns a non-2xx upstream response into `UpstreamFailure` summarised as
// `"<service> 调用失败：<status> <body>"`.
pub(crate) async fn ensure_success(response: Response, service: &str) -> ToolOutcome<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ToolError::upstream(format!(
        "{service} 调用失败：{} {}",
        status.as_u16(),
        clip(&body)
    )))
}

pub(crate) fn transport(service: &str) -> impl Fn(reqwest::Error) -> ToolError + '_ {
    move |e| ToolError::upstream_with(format!("{service} 调用失败"), e)
}
