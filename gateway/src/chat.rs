use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, info};
use workbench_tools::voice::DEFAULT_VOICE;

use crate::api::{AvatarChatRequest, ChatRequest, ChatResponse};
use crate::error::ApiError;
use crate::AppState;

pub(crate) async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = body?;
    let brain = state
        .brain
        .as_ref()
        .ok_or_else(|| ApiError::internal("未配置 OpenAI API Key"))?;
    if request.messages.is_empty() {
        return Err(ApiError::bad_request("messages 不能为空"));
    }

    info!(
        messages = request.messages.len(),
        use_tools = request.use_tools,
        "Brain is planning a reply..."
    );
    let outcome = brain
        .chat(&state.dispatcher, &request.messages, request.use_tools)
        .await
        .map_err(|e| {
            error!("Brain Failure: {e:#}");
            ApiError::internal("对话失败").with_message(format!("{e:#}"))
        })?;
    Ok(Json(ChatResponse { ok: true, outcome }))
}

fn relay_failure(message: impl Into<String>) -> Response {
    let message = message.into();
    error!("Avatar chat failed: {message}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}

// Forwards the voice service's SSE chat stream byte for byte.
pub(crate) async fn avatar_chat(
    State(state): State<AppState>,
    body: Result<Json<AvatarChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body?;
    let message = request.message.trim();
    if message.is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "消息不能为空" })),
        )
            .into_response());
    }
    let voice = request.voice.as_deref().unwrap_or(DEFAULT_VOICE);
    info!(voice, "Avatar chat: {}", message.chars().take(50).collect::<String>());

    let url = format!(
        "{}/api/avatar-chat-stream",
        state.settings.voice_service_url.trim_end_matches('/')
    );
    let upstream = match state
        .tools
        .http
        .post(url)
        .json(&json!({ "message": message, "voice": voice }))
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            return Ok(relay_failure(format!(
                "语音闲聊服务调用失败：{}",
                response.status().as_u16()
            )))
        }
        Err(e) => return Ok(relay_failure(format!("语音闲聊服务调用失败：{e}"))),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| ApiError::internal(e.to_string()))
}
