use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use workbench_core::{Args, Category, ParamSpec, ToolDefinition, ToolError, ToolHandler, ToolOutcome};

use crate::context::{ensure_success, transport, ToolContext};

const MODEL: &str = "dall-e-3";

pub fn definition() -> ToolDefinition {
    ToolDefinition::new("image-gen", "AI 图片生成", Category::Basic, "DALL-E 3 文生图")
        .param(ParamSpec::text("prompt").required().missing_message("请提供图片描述"))
        .param(
            ParamSpec::select("size", &["1024x1024", "1024x1792", "1792x1024"])
                .default_value(json!("1024x1024")),
        )
}

pub struct ImageGenTool {
    ctx: Arc<ToolContext>,
}

impl ImageGenTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for ImageGenTool {
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        let prompt = args.str("prompt")?;
        let size = args.str_or("size", "1024x1024");
        let api_key = self
            .ctx
            .settings
            .openai_api_key
            .as_deref()
            .ok_or_else(|| ToolError::upstream("未配置 OpenAI API Key"))?;

        info!(size, "Generating image: {}", prompt.chars().take(50).collect::<String>());
        let body = json!({
            "model": MODEL,
            "prompt": prompt,
            "n": 1,
            "size": size,
            "quality": "standard",
            "response_format": "url",
        });
        let url = format!(
            "{}/images/generations",
            self.ctx.settings.openai_base_url.trim_end_matches('/')
        );
        let response = self
            .ctx
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(&body)
            .timeout(std::time::Duration::from_secs(120))
            .send()
            .await
            .map_err(transport("图片生成"))?;
        let response = ensure_success(response, "图片生成").await?;
        let result: Value = response.json().await.map_err(transport("图片生成"))?;

        let first = result
            .get("data")
            .and_then(|d| d.get(0))
            .ok_or_else(|| ToolError::upstream("图片生成失败：接口未返回图片"))?;
        let image_url = first
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::upstream("图片生成失败：接口未返回图片链接"))?;

        Ok(json!({
            "image_url": image_url,
            "prompt": prompt,
            "revised_prompt": first.get("revised_prompt").cloned().unwrap_or(Value::Null),
            "size": size,
            "model": MODEL,
            "tip": "图片链接有效期约1小时，请及时保存",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use tempfile::tempdir;
    use tokio::net::TcpListener;
    use workbench_core::Settings;

    fn args(value: Value) -> Args {
        Args::new(value.as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn missing_key_is_upstream_failure() {
        let dir = tempdir().expect("tempdir");
        let ctx = ToolContext::new(Arc::new(Settings::rooted_at(dir.path()))).unwrap();
        let err = ImageGenTool::new(Arc::new(ctx))
            .execute(args(json!({ "prompt": "a cat" })))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "未配置 OpenAI API Key");
    }

    #[tokio::test]
    async fn returns_url_and_revised_prompt() {
        let router = Router::new().route(
            "/v1/images/generations",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-test");
                assert_eq!(body["model"], "dall-e-3");
                Json(json!({ "data": [{ "url": "https://img.example/cat.png", "revised_prompt": "a fluffy cat" }] }))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        let dir = tempdir().expect("tempdir");
        let mut settings = Settings::rooted_at(dir.path());
        settings.openai_api_key = Some("sk-test".into());
        settings.openai_base_url = format!("http://{addr}/v1");
        let ctx = ToolContext::new(Arc::new(settings)).unwrap();

        let value = ImageGenTool::new(Arc::new(ctx))
            .execute(args(json!({ "prompt": "a cat", "size": "1024x1024" })))
            .await
            .unwrap();
        assert_eq!(value["image_url"], "https://img.example/cat.png");
        assert_eq!(value["revised_prompt"], "a fluffy cat");
    }
}
