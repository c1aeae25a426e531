use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use workbench_core::llm::{ChatMessage, ChatOutcome};
use workbench_core::registry::ToolDefinition;
use workbench_core::{UploadedFile, Workflow, WorkflowExecution, WorkflowTemplate};

// Input: a chat turn from the workbench
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_use_tools")]
    pub use_tools: bool,
}

fn default_use_tools() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub outcome: ChatOutcome,
}

#[derive(Debug, Deserialize)]
pub struct AvatarChatRequest {
    #[serde(default)]
    pub message: String,
    pub voice: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ToolListResponse {
    pub ok: bool,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Default, Serialize)]
pub struct AvatarList {
    pub lan: Vec<String>,
    pub yuan: Vec<String>,
}

// Input: either an inline workflow or the id of a template
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunRequest {
    pub workflow: Option<Workflow>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowRunResponse {
    pub ok: bool,
    pub execution: WorkflowExecution,
}

#[derive(Debug, Serialize)]
pub struct WorkflowTemplateList {
    pub ok: bool,
    pub templates: Vec<WorkflowTemplate>,
}
