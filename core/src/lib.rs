pub mod activity;
pub mod arguments;
pub mod config;
pub mod dispatcher;
pub mod downloads;
pub mod envelope;
pub mod error;
pub mod llm;
pub mod registry;
pub mod staging;
pub mod workflow;

pub use activity::ActivityLog;
pub use arguments::Args;
pub use config::Settings;
pub use dispatcher::{Dispatcher, ToolInvocation};
pub use downloads::{download_url, Download, DownloadRegistry};
pub use envelope::ToolResult;
pub use error::{ErrorKind, ToolError, ToolOutcome};
pub use registry::{Category, ParamKind, ParamSpec, ToolDefinition, ToolHandler, ToolRegistry};
pub use staging::{UploadStore, UploadedFile};
pub use workflow::{Workflow, WorkflowEngine, WorkflowExecution, WorkflowStep, WorkflowTemplate};
