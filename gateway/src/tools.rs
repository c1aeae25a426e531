use std::collections::HashMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{post, MethodRouter};
use axum::Json;
use serde_json::{json, Map, Value};
use workbench_core::{ToolInvocation, ToolResult};

use crate::api::ToolListResponse;
use crate::error::{status_for, ApiError};
use crate::AppState;

// 200 for success, otherwise the status of the failure category.
pub(crate) fn respond(result: ToolResult) -> Response {
    let status = result.kind().map(status_for).unwrap_or(StatusCode::OK);
    (status, Json(result)).into_response()
}

pub(crate) async fn list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .dispatcher
        .registry()
        .list()
        .into_iter()
        .cloned()
        .collect();
    Json(ToolListResponse { ok: true, tools })
}

pub(crate) async fn run_tool(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(arguments) = body?;
    Ok(respond(state.dispatcher.execute_value(&id, arguments).await))
}

pub(crate) fn json_tool(tool_id: &'static str) -> MethodRouter<AppState> {
    post(
        move |State(state): State<AppState>, body: Result<Json<Value>, JsonRejection>| async move {
            let Json(arguments) = body?;
            Ok::<_, ApiError>(respond(state.dispatcher.execute_value(tool_id, arguments).await))
        },
    )
}

// A POST route that stages uploaded files from a multipart form and passes
// their staged names, alongside the text fields, to a fixed tool.
pub(crate) fn form_tool(tool_id: &'static str) -> MethodRouter<AppState> {
    post(move |State(state): State<AppState>, multipart: Multipart| async move {
        let arguments = collect_form(&state, multipart).await?;
        let invocation = ToolInvocation::new(tool_id, arguments);
        Ok::<_, ApiError>(respond(state.dispatcher.execute(invocation).await))
    })
}

async fn collect_form(state: &AppState, mut multipart: Multipart) -> Result<Map<String, Value>, ApiError> {
    let mut arguments = Map::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match field.file_name().map(str::to_string) {
            Some(original) => {
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await?;
                let staged = state.tools.uploads.stage(&original, &bytes, &mime).await?;
                arguments.insert(name, Value::String(staged.filename));
            }
            None => {
                let text = field.text().await?;
                arguments.insert(name, Value::String(text));
            }
        }
    }
    Ok(arguments)
}

pub(crate) async fn weather(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let arguments: Map<String, Value> = query
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    respond(
        state
            .dispatcher
            .execute(ToolInvocation::new("weather-demo", arguments))
            .await,
    )
}

pub(crate) async fn list_logs(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "ok": true, "logs": state.activity.list() }))
}

pub(crate) async fn clear_logs(State(state): State<AppState>) -> Json<Value> {
    state.activity.clear();
    Json(json!({ "ok": true }))
}
