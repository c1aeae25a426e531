use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use workbench_core::{Args, Category, ParamSpec, ToolDefinition, ToolHandler, ToolOutcome};

use crate::context::{ensure_success, transport, ToolContext};

pub fn definition() -> ToolDefinition {
    ToolDefinition::new("code-exec", "代码执行", Category::Basic, "在线运行 Python/JavaScript 代码")
        .param(ParamSpec::select("language", &["python", "javascript"]).default_value(json!("python")))
        .param(ParamSpec::text("code").required().missing_message("缺少代码"))
        .param(ParamSpec::text("stdin").default_value(json!("")))
}

pub struct CodeExecTool {
    ctx: Arc<ToolContext>,
}

impl CodeExecTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for CodeExecTool {
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        let language = args.str_or("language", "python");
        let code = args.str("code")?;
        let stdin = args.str_or("stdin", "");

        info!(language, bytes = code.len(), "Submitting code to Piston");
        let body = json!({
            "language": language,
            "version": "*",
            "files": [{ "name": "main", "content": code }],
            "stdin": stdin,
        });
        let response = self
            .ctx
            .http
            .post(&self.ctx.settings.piston_url)
            .json(&body)
            .send()
            .await
            .map_err(transport("Piston"))?;
        let response = ensure_success(response, "Piston").await?;
        let out: Value = response.json().await.map_err(transport("Piston"))?;
        Ok(json!({ "out": out }))
    }
}
