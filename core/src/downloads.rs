use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ToolOutcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadMeta {
    filename: String,
    mime: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Download {
    pub filename: String,
    pub mime: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DownloadRegistry {
    dir: PathBuf,
    ttl: Duration,
}

pub fn download_url(token: &str) -> String {
    format!("/api/download?token={token}")
}

impl DownloadRegistry {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, token: &str) -> (PathBuf, PathBuf) {
        (
            self.dir.join(format!("{token}.data")),
            self.dir.join(format!("{token}.meta.json")),
        )
    }

    pub async fn register(&self, data: &[u8], filename: &str, mime: &str) -> ToolOutcome<String> {
        fs::create_dir_all(&self.dir).await?;
        let token = Uuid::new_v4().simple().to_string();
        let (data_path, meta_path) = self.paths(&token);
        fs::write(&data_path, data).await?;

        let meta = DownloadMeta {
            filename: filename.to_string(),
            mime: mime.to_string(),
            created_at: Utc::now(),
        };
        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| crate::error::ToolError::internal("下载登记失败", e))?;
        fs::write(&meta_path, meta_json).await?;

        debug!(%token, filename, "Registered download");
        Ok(token)
    }

    /// Returns the download and deletes it. Unknown, malformed and expired
    /// tokens all yield `None`.
    pub async fn consume(&self, token: &str) -> Option<Download> {
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        let (data_path, meta_path) = self.paths(token);

        let meta_raw = fs::read(&meta_path).await.ok()?;
        let meta: DownloadMeta = match serde_json::from_slice(&meta_raw) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(%token, error = %e, "Corrupt download metadata");
                self.cleanup(token).await;
                return None;
            }
        };

        let age = Utc::now().signed_duration_since(meta.created_at);
        if age.to_std().map(|age| age > self.ttl).unwrap_or(false) {
            debug!(%token, "Download expired");
            self.cleanup(token).await;
            return None;
        }

        let data = fs::read(&data_path).await.ok()?;
        self.cleanup(token).await;
        Some(Download {
            filename: meta.filename,
            mime: meta.mime,
            data,
        })
    }

    async fn cleanup(&self, token: &str) {
        let (data_path, meta_path) = self.paths(token);
        // Either file may already be gone.
        let _ = fs::remove_file(data_path).await;
        let _ = fs::remove_file(meta_path).await;
    }
}
