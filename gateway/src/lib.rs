pub mod api;
pub mod error;

mod chat;
mod files;
mod tools;
mod workflow;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use workbench_core::llm::Brain;
use workbench_core::{ActivityLog, Dispatcher, Settings, WorkflowEngine};
use workbench_tools::{builtin_registry, ToolContext};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub tools: Arc<ToolContext>,
    pub dispatcher: Arc<Dispatcher>,
    pub workflows: WorkflowEngine,
    pub activity: ActivityLog,
    pub brain: Option<Arc<Brain>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self> {
        let settings = Arc::new(settings);
        let tools = Arc::new(ToolContext::new(settings.clone()).context("Failed to build tool context")?);

        info!("Loading Tool Registry...");
        let registry = builtin_registry(tools.clone()).context("Failed to build tool registry")?;
        info!("Loaded {} tools.", registry.len());

        let activity = ActivityLog::new(settings.activity_capacity);
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry)).with_activity(activity.clone()));
        let workflows = WorkflowEngine::new(dispatcher.clone());

        let brain = match Brain::new(&settings) {
            Ok(brain) => Some(Arc::new(brain)),
            Err(e) => {
                warn!("Chat disabled: {e:#}");
                None
            }
        };

        Ok(Self {
            settings,
            tools,
            dispatcher,
            workflows,
            activity,
            brain,
        })
    }
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(state.settings.max_upload_bytes);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/tools", get(tools::list_tools))
        .route("/api/tools/{id}/run", post(tools::run_tool))
        .route("/api/tools/search", tools::json_tool("web-search"))
        .route("/api/tools/piston", tools::json_tool("code-exec"))
        .route("/api/tools/math", tools::json_tool("math"))
        .route("/api/tools/image-gen", tools::json_tool("image-gen"))
        .route("/api/tools/weather-demo", get(tools::weather))
        .route("/api/tools/aspose-qrcode", tools::json_tool("qrcode-gen"))
        .route("/api/tools/aspose-ppt", tools::json_tool("ppt-create"))
        .route("/api/tools/aspose-convert", tools::form_tool("doc-convert"))
        .route("/api/tools/aspose-pdf", tools::form_tool("pdf-extract"))
        .route("/api/tools/aspose-ocr", tools::form_tool("ocr-aspose"))
        .route("/api/tts", tools::json_tool("tts"))
        .route("/api/workflow/templates", get(workflow::templates))
        .route("/api/workflow/run", post(workflow::run))
        .route("/api/logs", get(tools::list_logs).delete(tools::clear_logs))
        .route("/api/upload-chat", post(files::upload_chat))
        .route("/api/download", get(files::download_by_query))
        .route("/api/download/{token}", get(files::download_by_path))
        .route("/api/avatars", get(files::avatars))
        .route("/api/chat", post(chat::chat))
        .route("/api/avatar-chat", post(chat::avatar_chat))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> &'static str {
    "Workbench Gateway: Operational"
}
