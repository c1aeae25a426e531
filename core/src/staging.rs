use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::error::{ToolError, ToolOutcome};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// Name under which the file is stored; tools take this as their `file` argument.
    pub filename: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub storage_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

/// Keeps the final path component and drops characters that are awkward in
/// file names. Non-ASCII letters survive.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn stage(
        &self,
        original_name: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> ToolOutcome<UploadedFile> {
        fs::create_dir_all(&self.dir).await?;
        let original_name = sanitize_filename(original_name);
        let filename = format!("{}-{}", Utc::now().timestamp_millis(), original_name);
        let storage_path = self.dir.join(&filename);
        fs::write(&storage_path, bytes).await?;

        info!(file = %filename, size = bytes.len(), "Staged upload");
        Ok(UploadedFile {
            filename,
            original_name,
            size_bytes: bytes.len() as u64,
            mime_type: mime_type.to_string(),
            storage_path,
        })
    }

    pub async fn resolve(&self, filename: &str) -> ToolOutcome<PathBuf> {
        if filename.is_empty()
            || filename.contains(['/', '\\'])
            || filename == "."
            || filename == ".."
        {
            return Err(ToolError::invalid("file", format!("非法文件名: {filename}")));
        }
        let path = self.dir.join(filename);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ToolError::invalid("file", format!("文件不存在: {filename}")));
        }
        Ok(path)
    }

    /// A path below the staging directory. Absolute paths and `..` are
    /// rejected; an empty path is the directory itself.
    pub fn within(&self, relative: &str) -> ToolOutcome<PathBuf> {
        let mut path = self.dir.clone();
        for component in Path::new(relative.trim()).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(ToolError::invalid(
                        "path",
                        format!("路径必须位于上传目录内: {relative}"),
                    ))
                }
            }
        }
        Ok(path)
    }

    pub async fn read(&self, filename: &str) -> ToolOutcome<Vec<u8>> {
        let path = self.resolve(filename).await?;
        Ok(fs::read(path).await?)
    }
}
