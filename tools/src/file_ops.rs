use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::fs;
use tracing::info;
use workbench_core::{Args, Category, ParamSpec, ToolDefinition, ToolError, ToolHandler, ToolOutcome};

use crate::context::ToolContext;

pub fn definition() -> ToolDefinition {
    ToolDefinition::new("file-ops", "文件操作", Category::Files, "管理上传目录中的文件和文件夹")
        .param(
            ParamSpec::select(
                "operation",
                &["list", "create_dir", "delete", "move", "copy", "rename", "info"],
            )
            .default_value(json!("list")),
        )
        .param(ParamSpec::text("path").default_value(json!("")))
        .param(ParamSpec::text("new_path"))
}

pub struct FileOpsTool {
    ctx: Arc<ToolContext>,
}

impl FileOpsTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for FileOpsTool {
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        let uploads = &self.ctx.uploads;
        let relative = args.str_or("path", "");
        let path = uploads.within(relative)?;
        let operation = args.str_or("operation", "list");

        let value = match operation {
            "list" => list(&path, relative).await?,
            "info" => describe(&path, relative).await?,
            "create_dir" => {
                require_entry(relative)?;
                fs::create_dir_all(&path).await?;
                json!({ "success": true, "path": relative, "note": format!("文件夹已创建: {relative}") })
            }
            "delete" => {
                require_entry(relative)?;
                let deleted = match fs::metadata(&path).await {
                    Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path).await.map(|_| true)?,
                    Ok(_) => fs::remove_file(&path).await.map(|_| true)?,
                    Err(_) => false,
                };
                let note = if deleted { format!("已删除: {relative}") } else { "文件不存在".to_string() };
                json!({ "success": deleted, "path": relative, "note": note })
            }
            "move" | "copy" => {
                require_entry(relative)?;
                let target = args.str("new_path")?;
                let destination = uploads.within(target)?;
                require_entry(target)?;
                if !fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(ToolError::invalid("path", format!("源文件不存在: {relative}")));
                }
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent).await?;
                }
                if operation == "move" {
                    fs::rename(&path, &destination).await?;
                } else {
                    fs::copy(&path, &destination).await?;
                }
                json!({
                    "success": true,
                    "sourcePath": relative,
                    "destPath": target,
                    "note": format!("{relative} → {target}"),
                })
            }
            "rename" => {
                require_entry(relative)?;
                let new_name = args.str("new_path")?;
                if new_name.contains(['/', '\\']) || new_name == "." || new_name == ".." {
                    return Err(ToolError::invalid("new_path", format!("非法文件名: {new_name}")));
                }
                if !fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(ToolError::invalid("path", format!("文件不存在: {relative}")));
                }
                let destination = path.with_file_name(new_name);
                fs::rename(&path, &destination).await?;
                json!({
                    "success": true,
                    "oldName": relative,
                    "newName": new_name,
                    "note": format!("已重命名: {relative} → {new_name}"),
                })
            }
            other => return Err(ToolError::invalid("operation", format!("不支持的操作: {other}"))),
        };

        info!(operation, path = relative, "File operation done");
        Ok(value)
    }
}

// Operations that modify an entry never target the uploads root itself.
fn require_entry(relative: &str) -> ToolOutcome<()> {
    let is_root = Path::new(relative.trim())
        .components()
        .all(|c| matches!(c, std::path::Component::CurDir));
    if is_root {
        return Err(ToolError::missing("path"));
    }
    Ok(())
}

fn modified(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

async fn list(dir: &Path, relative: &str) -> ToolOutcome<Value> {
    let shown = if relative.is_empty() { "uploads" } else { relative };
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => {
            return Ok(json!({ "path": shown, "exists": false, "items": [], "message": "目录不存在" }))
        }
    };

    let mut items = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        let kind = if meta.is_dir() { "directory" } else { "file" };
        items.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "type": kind,
            "size": meta.len(),
            "modified": modified(&meta),
        }));
    }
    items.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    let directories = items.iter().filter(|i| i["type"] == "directory").count();
    Ok(json!({
        "path": shown,
        "exists": true,
        "totalItems": items.len(),
        "files": items.len() - directories,
        "directories": directories,
        "items": items,
        "note": format!("目录列表: {} 个项目", items.len()),
    }))
}

async fn describe(path: &Path, relative: &str) -> ToolOutcome<Value> {
    let Ok(meta) = fs::metadata(path).await else {
        return Ok(json!({ "exists": false, "path": relative }));
    };
    Ok(json!({
        "exists": true,
        "path": relative,
        "size": meta.len(),
        "modified": modified(&meta),
        "isDirectory": meta.is_dir(),
        "isFile": meta.is_file(),
    }))
}
