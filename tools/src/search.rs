use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use workbench_core::{Args, Category, ParamSpec, ToolDefinition, ToolHandler, ToolOutcome};

use crate::context::{ensure_success, transport, ToolContext};

pub fn definition() -> ToolDefinition {
    ToolDefinition::new("web-search", "网页搜索", Category::Basic, "实时搜索互联网信息")
        .param(ParamSpec::text("q").required().missing_message("缺少 q"))
        .param(ParamSpec::integer("count").default_value(json!(5)))
        .param(ParamSpec::text("country").default_value(json!("")))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

fn demo_results() -> Value {
    json!({
        "notice": "未配置 BRAVE_API_KEY，返回演示结果",
        "results": [
            { "title": "Brave Search 示例结果 1", "url": "https://example.com/1", "snippet": "这是演示数据（未配置 API Key）。" },
            { "title": "Brave Search 示例结果 2", "url": "https://example.com/2", "snippet": "请在 .env 配置 BRAVE_API_KEY 以调用真实接口。" },
        ],
        "demo": true,
    })
}

pub struct WebSearchTool {
    ctx: Arc<ToolContext>,
}

impl WebSearchTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for WebSearchTool {
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        let query = args.str("q")?;
        let Some(key) = self.ctx.settings.brave_api_key.as_deref() else {
            info!("No Brave key configured; serving demo results");
            return Ok(demo_results());
        };

        let count = args.opt_i64("count").unwrap_or(5).clamp(1, 20).to_string();
        let mut query_params = vec![("q", query.to_string()), ("count", count)];
        if let Some(country) = args.opt_str("country") {
            query_params.push(("country", country.to_string()));
        }

        let response = self
            .ctx
            .http
            .get(&self.ctx.settings.brave_search_url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", key)
            .query(&query_params)
            .send()
            .await
            .map_err(transport("Brave API"))?;
        let response = ensure_success(response, "Brave API").await?;
        let body: BraveResponse = response.json().await.map_err(transport("Brave API"))?;

        let results: Vec<SearchHit> = body
            .web
            .map(|web| web.results)
            .unwrap_or_default()
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                snippet: r.description,
            })
            .collect();
        info!(hits = results.len(), "Brave search finished");
        Ok(json!({ "results": results }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use tempfile::tempdir;
    use tokio::net::TcpListener;
    use workbench_core::{Dispatcher, Settings, ToolRegistry};

    async fn fake_brave() -> String {
        async fn search(
            headers: HeaderMap,
            Query(params): Query<HashMap<String, String>>,
        ) -> Json<Value> {
            assert_eq!(headers["x-subscription-token"], "test-key");
            Json(json!({
                "web": { "results": [
                    {
                        "title": params["q"].clone(),
                        "url": "https://a.example",
                        "description": params.get("country").cloned().unwrap_or_else(|| "first".into()),
                    }
                ]}
            }))
        }
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, Router::new().route("/search", get(search))).await;
        });
        format!("http://{addr}/search")
    }

    fn args(value: Value) -> Args {
        Args::new(value.as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn missing_key_degrades_to_demo_data() {
        let dir = tempdir().expect("tempdir");
        let ctx = ToolContext::new(Arc::new(Settings::rooted_at(dir.path()))).unwrap();
        let value = WebSearchTool::new(Arc::new(ctx))
            .execute(args(json!({ "q": "rust" })))
            .await
            .unwrap();
        assert_eq!(value["demo"], true);
        assert_eq!(value["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reshapes_brave_results() {
        let dir = tempdir().expect("tempdir");
        let mut settings = Settings::rooted_at(dir.path());
        settings.brave_api_key = Some("test-key".into());
        settings.brave_search_url = fake_brave().await;
        let ctx = ToolContext::new(Arc::new(settings)).unwrap();

        let value = WebSearchTool::new(Arc::new(ctx))
            .execute(args(json!({ "q": "tokio", "count": 3 })))
            .await
            .unwrap();
        assert_eq!(
            value,
            json!({ "results": [{ "title": "tokio", "url": "https://a.example", "snippet": "first" }] })
        );
    }

    #[tokio::test]
    async fn any_country_code_is_forwarded() {
        let dir = tempdir().expect("tempdir");
        let mut settings = Settings::rooted_at(dir.path());
        settings.brave_api_key = Some("test-key".into());
        settings.brave_search_url = fake_brave().await;
        let ctx = Arc::new(ToolContext::new(Arc::new(settings)).unwrap());

        let mut registry = ToolRegistry::new();
        registry.register(definition(), WebSearchTool::new(ctx)).unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let result = dispatcher
            .execute_value("web-search", json!({ "q": "rust", "country": "jp" }))
            .await;
        assert!(result.ok, "{:?}", result.error);
        assert_eq!(result.field("results"), Some(&json!([
            { "title": "rust", "url": "https://a.example", "snippet": "jp" }
        ])));
    }
}
