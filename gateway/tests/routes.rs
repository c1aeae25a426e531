use axum::http::{header, HeaderValue};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;
use workbench_core::Settings;
use workbench_gateway::{app, AppState};

const SSE_BODY: &str = "data: {\"type\":\"text\",\"content\":\"你好\"}\n\ndata: [DONE]\n\n";

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

struct Gateway {
    base: String,
    client: reqwest::Client,
    _root: TempDir,
}

impl Gateway {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(configure: impl FnOnce(&mut Settings)) -> Self {
        let root = tempdir().expect("tempdir");
        let mut settings = Settings::rooted_at(root.path());
        configure(&mut settings);
        let state = AppState::new(settings).expect("state");
        let base = serve(app(state)).await;
        Self {
            base,
            client: reqwest::Client::new(),
            _root: root,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn post_json(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("request");
        let status = response.status();
        (status, response.json().await.expect("json body"))
    }

    async fn get_json(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.expect("request");
        let status = response.status();
        (status, response.json().await.expect("json body"))
    }
}

#[tokio::test]
async fn health_reports_operational() {
    let gw = Gateway::start().await;
    let body = reqwest::get(gw.url("/health")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "Workbench Gateway: Operational");
}

#[tokio::test]
async fn math_route_success_and_missing_expression() {
    let gw = Gateway::start().await;

    let (status, body) = gw.post_json("/api/tools/math", json!({ "expr": "2+2" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "value": 4 }));

    let (status, body) = gw.post_json("/api/tools/math", json!({ "expr": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "ok": false, "error": "缺少表达式 expr" }));
}

#[tokio::test]
async fn repeated_invocations_are_idempotent() {
    let gw = Gateway::start().await;
    let (_, first) = gw.post_json("/api/tools/math", json!({ "expr": "sqrt(16) * 3" })).await;
    let (_, second) = gw.post_json("/api/tools/math", json!({ "expr": "sqrt(16) * 3" })).await;
    assert_eq!(first, second);
    assert_eq!(first["value"], 12);
}

#[tokio::test]
async fn tool_listing_and_unknown_tool() {
    let gw = Gateway::start().await;

    let (status, body) = gw.get_json("/api/tools").await;
    assert_eq!(status, StatusCode::OK);
    let tools = body["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 18);
    assert_eq!(tools[2]["id"], "math");
    assert_eq!(tools[2]["params"][0]["key"], "expr");

    let (status, body) = gw.post_json("/api/tools/does-not-exist/run", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "未知的工具: does-not-exist");
}

#[tokio::test]
async fn search_without_key_serves_demo_results() {
    let gw = Gateway::start().await;
    let (status, body) = gw.post_json("/api/tools/search", json!({ "q": "rust" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["demo"], true);
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn search_accepts_any_country_code() {
    let gw = Gateway::start().await;
    let (status, body) = gw
        .post_json("/api/tools/search", json!({ "q": "rust", "country": "jp" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn deeply_nested_math_is_rejected_and_server_survives() {
    let gw = Gateway::start().await;
    let n = 100_000;
    let expr = format!("{}1{}", "(".repeat(n), ")".repeat(n));

    let (status, body) = gw.post_json("/api/tools/math", json!({ "expr": expr })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "ok": false, "error": "表达式嵌套过深" }));

    let (status, _) = gw.post_json("/api/tools/math", json!({ "expr": "1+1" })).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn workflow_templates_are_listed_and_runnable() {
    let gw = Gateway::start().await;

    let (status, body) = gw.get_json("/api/workflow/templates").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["templates"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["id"].as_str())
        .collect();
    assert!(ids.contains(&"csv_to_chart"));

    let (status, body) = gw
        .post_json(
            "/api/workflow/run",
            json!({ "templateId": "csv_to_chart", "variables": { "csv": "k,v\nx,1" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["execution"]["status"], "completed");
    assert_eq!(body["execution"]["results"]["chart"]["chartData"], json!([{ "k": "x", "v": 1 }]));
    assert_eq!(body["execution"]["logs"][0]["step"], "workflow_start");
}

#[tokio::test]
async fn inline_workflow_passes_results_between_steps() {
    let gw = Gateway::start().await;
    let workflow = json!({
        "name": "计算后转大写",
        "startStep": "calc",
        "steps": [
            { "id": "calc", "tool": "math", "params": { "expr": "${expr}" }, "nextSteps": ["shout"] },
            { "id": "shout", "tool": "text-process", "params": { "mode": "upper", "text": "value=${step_calc.value}" } },
        ],
    });

    let (status, body) = gw
        .post_json("/api/workflow/run", json!({ "workflow": workflow, "variables": { "expr": "6*7" } }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["execution"]["workflowId"], "inline");
    assert_eq!(body["execution"]["results"]["shout"]["data"], "VALUE=42");

    // Step failures answer 200 with ok:false and the failing step's error.
    let failing = json!({
        "name": "坏表达式",
        "startStep": "calc",
        "steps": [{ "id": "calc", "tool": "math", "params": { "expr": "2 +" } }],
    });
    let (status, body) = gw.post_json("/api/workflow/run", json!({ "workflow": failing })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);
    assert_eq!(body["execution"]["status"], "failed");
    assert_eq!(body["execution"]["errors"][0]["step"], "calc");
}

#[tokio::test]
async fn malformed_workflow_requests_are_rejected() {
    let gw = Gateway::start().await;

    let (status, body) = gw.post_json("/api/workflow/run", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "缺少 workflow 或 templateId");

    let (status, _) = gw.post_json("/api/workflow/run", json!({ "templateId": "nope" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let dangling = json!({
        "name": "x",
        "startStep": "a",
        "steps": [{ "id": "a", "tool": "math", "nextSteps": ["b"] }],
    });
    let (status, body) = gw.post_json("/api/workflow/run", json!({ "workflow": dangling })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);

    let unknown_tool = json!({
        "name": "x",
        "startStep": "a",
        "steps": [{ "id": "a", "tool": "teleport" }],
    });
    let (status, body) = gw.post_json("/api/workflow/run", json!({ "workflow": unknown_tool })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "未知的工具: teleport");
}

#[tokio::test]
async fn file_ops_lists_staged_uploads() {
    let gw = Gateway::start().await;
    let form = Form::new().part("files", Part::bytes(b"hi".to_vec()).file_name("note.txt"));
    let response = gw.client.post(gw.url("/api/upload-chat")).multipart(form).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = gw.post_json("/api/tools/file-ops/run", json!({ "operation": "list" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalItems"], 1);
    assert!(body["items"][0]["name"].as_str().unwrap().ends_with("-note.txt"));

    let (status, _) = gw
        .post_json("/api/tools/file-ops/run", json!({ "operation": "delete", "path": "../outputs" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn weather_demo_is_deterministic() {
    let gw = Gateway::start().await;
    let (status, body) = gw.get_json("/api/tools/weather-demo").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["city"], "示例市");
    assert_eq!(body["days"].as_array().unwrap().len(), 3);

    let (_, named) = gw.get_json("/api/tools/weather-demo?city=杭州").await;
    assert_eq!(named["city"], "杭州");
    assert_eq!(named["days"], body["days"]);
}

#[tokio::test]
async fn malformed_json_uses_the_failure_envelope() {
    let gw = Gateway::start().await;
    let response = gw
        .client
        .post(gw.url("/api/tools/math"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "请求体不是合法的 JSON");
}

#[tokio::test]
async fn uploads_can_be_read_back_by_tools() {
    let gw = Gateway::start().await;
    let part = Part::bytes(b"hello workbench".to_vec())
        .file_name("notes.txt")
        .mime_str("text/plain")
        .unwrap();
    let response = gw
        .client
        .post(gw.url("/api/upload-chat"))
        .multipart(Form::new().part("files", part))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    let staged = body["files"][0]["filename"].as_str().unwrap().to_string();
    assert!(staged.ends_with("-notes.txt"));
    assert_eq!(body["files"][0]["originalName"], "notes.txt");

    let (status, read) = gw
        .post_json("/api/tools/file-read/run", json!({ "file": staged }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["preview"], "hello workbench");
    assert_eq!(read["name"], "notes.txt");

    let (status, escaped) = gw
        .post_json("/api/tools/file-read/run", json!({ "file": "../secret.txt" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(escaped["ok"], false);
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let gw = Gateway::start().await;
    let response = gw
        .client
        .post(gw.url("/api/upload-chat"))
        .multipart(Form::new().text("note", "no files"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "未选择文件");
}

#[tokio::test]
async fn generated_documents_download_once() {
    let gw = Gateway::start().await;
    let (status, doc) = gw
        .post_json(
            "/api/tools/doc-create/run",
            json!({ "format": "txt", "content": "季度总结" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let link = doc["downloadUrl"].as_str().unwrap().to_string();

    let first = gw.client.get(gw.url(&link)).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()[header::CACHE_CONTROL], "no-store");
    let disposition = first.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment; filename*=UTF-8''document_"));
    assert_eq!(first.text().await.unwrap(), "季度总结");

    let second = gw.client.get(gw.url(&link)).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
    assert_eq!(second.text().await.unwrap(), "Invalid or expired token");

    let missing = gw.client.get(gw.url("/api/download")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(missing.text().await.unwrap(), "Missing token");
}

#[tokio::test]
async fn path_style_download_links_work() {
    let gw = Gateway::start().await;
    let (_, doc) = gw
        .post_json("/api/tools/doc-create/run", json!({ "content": "# Title" }))
        .await;
    let token = doc["downloadUrl"].as_str().unwrap().rsplit('=').next().unwrap().to_string();

    let response = gw
        .client
        .get(gw.url(&format!("/api/download/{token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/markdown");
}

#[tokio::test]
async fn activity_log_records_and_clears() {
    let gw = Gateway::start().await;
    gw.post_json("/api/tools/math", json!({ "expr": "1+1" })).await;
    gw.post_json("/api/tools/math", json!({ "expr": "" })).await;

    let (_, logs) = gw.get_json("/api/logs").await;
    let entries = logs["logs"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["ok"], false);
    assert_eq!(entries[1]["toolId"], "math");

    let cleared = gw.client.delete(gw.url("/api/logs")).send().await.unwrap();
    assert_eq!(cleared.status(), StatusCode::OK);
    let (_, logs) = gw.get_json("/api/logs").await;
    assert!(logs["logs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn chat_without_key_is_a_server_error() {
    let gw = Gateway::start().await;
    let (status, body) = gw
        .post_json(
            "/api/chat",
            json!({ "messages": [{ "role": "user", "content": "hi" }] }),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "ok": false, "error": "未配置 OpenAI API Key" }));
}

#[tokio::test]
async fn form_tools_report_missing_files() {
    let gw = Gateway::start().await;
    let response = gw
        .client
        .post(gw.url("/api/tools/aspose-convert"))
        .multipart(Form::new().text("format", "pdf"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "必须提供文件和目标格式");
}

#[tokio::test]
async fn avatar_chat_rejects_blank_messages() {
    let gw = Gateway::start().await;
    let (status, body) = gw
        .post_json("/api/avatar-chat", json!({ "message": "   " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "消息不能为空");
}

#[tokio::test]
async fn avatar_chat_forwards_the_stream_verbatim() {
    let voice = serve(Router::new().route(
        "/api/avatar-chat-stream",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["voice"], "zh_female_sajiaonvyou_moon_bigtts");
            assert_eq!(body["message"], "讲个笑话");
            (
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"))],
                SSE_BODY,
            )
                .into_response()
        }),
    ))
    .await;
    let gw = Gateway::start_with(|s| s.voice_service_url = voice).await;

    let response = gw
        .client
        .post(gw.url("/api/avatar-chat"))
        .json(&json!({ "message": "讲个笑话" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let mut stream = response.bytes_stream();
    let mut received = Vec::new();
    while let Some(chunk) = stream.next().await {
        received.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(String::from_utf8(received).unwrap(), SSE_BODY);
}

#[tokio::test]
async fn avatar_chat_upstream_failure_is_reported() {
    let voice = serve(Router::new().route(
        "/api/avatar-chat-stream",
        post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    ))
    .await;
    let gw = Gateway::start_with(|s| s.voice_service_url = voice).await;

    let (status, body) = gw
        .post_json("/api/avatar-chat", json!({ "message": "hi" }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn avatars_are_listed_by_persona() {
    let root = tempdir().expect("tempdir");
    let avatars = root.path().join("avatars");
    std::fs::create_dir_all(avatars.join("lan")).unwrap();
    std::fs::write(avatars.join("lan").join("a.png"), b"png").unwrap();
    std::fs::write(avatars.join("lan").join("notes.txt"), b"txt").unwrap();

    let gw = Gateway::start_with(|s| s.avatars_dir = avatars.clone()).await;
    let (status, body) = gw.get_json("/api/avatars").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "lan": ["lan/a.png"], "yuan": [] }));
}
