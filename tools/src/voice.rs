use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use workbench_core::{Args, Category, ParamSpec, ToolDefinition, ToolHandler, ToolOutcome};

use crate::context::{ensure_success, transport, ToolContext};

pub const DEFAULT_VOICE: &str = "zh_female_sajiaonvyou_moon_bigtts";

pub fn definition() -> ToolDefinition {
    ToolDefinition::new("tts", "语音合成", Category::Content, "文本转语音 (Base64 MP3)")
        .param(ParamSpec::text("text").required().missing_message("缺少文本参数"))
        .param(ParamSpec::text("voice").default_value(json!(DEFAULT_VOICE)))
}

pub struct TtsTool {
    ctx: Arc<ToolContext>,
}

impl TtsTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for TtsTool {
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        let text = args.str("text")?;
        let voice = args.str_or("voice", DEFAULT_VOICE);

        info!(voice, chars = text.chars().count(), "Requesting speech synthesis");
        let url = format!(
            "{}/api/tts",
            self.ctx.settings.voice_service_url.trim_end_matches('/')
        );
        let response = self
            .ctx
            .http
            .post(url)
            .json(&json!({ "text": text, "voice": voice }))
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(transport("语音服务"))?;
        let response = ensure_success(response, "语音服务").await?;
        response.json().await.map_err(transport("语音服务"))
    }
}
