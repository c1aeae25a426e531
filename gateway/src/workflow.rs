use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::info;
use workbench_tools::workflows;

use crate::api::{WorkflowRunRequest, WorkflowRunResponse, WorkflowTemplateList};
use crate::error::ApiError;
use crate::AppState;

pub(crate) async fn templates() -> Json<WorkflowTemplateList> {
    Json(WorkflowTemplateList {
        ok: true,
        templates: workflows::templates(),
    })
}

/// Step failures still answer 200 with `ok: false`; the execution log says why.
pub(crate) async fn run(
    State(state): State<AppState>,
    body: Result<Json<WorkflowRunRequest>, JsonRejection>,
) -> Result<Json<WorkflowRunResponse>, ApiError> {
    let Json(request) = body?;
    let workflow = match (request.workflow, request.template_id) {
        (Some(workflow), _) => workflow,
        (None, Some(id)) => workflows::template(&id)
            .map(|template| template.workflow)
            .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("未知的工作流模板: {id}")))?,
        (None, None) => return Err(ApiError::bad_request("缺少 workflow 或 templateId")),
    };

    let execution = state.workflows.run(&workflow, request.variables).await?;
    info!(exec = %execution.id, status = ?execution.status, "Workflow finished");
    Ok(Json(WorkflowRunResponse {
        ok: execution.succeeded(),
        execution,
    }))
}
