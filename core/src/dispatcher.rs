use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn, Instrument};

use crate::activity::ActivityLog;
use crate::arguments::validate;
use crate::envelope::ToolResult;
use crate::error::ToolError;
use crate::registry::ToolRegistry;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_id: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(tool_id: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool_id: tool_id.into(),
            arguments,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    activity: Option<ActivityLog>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            activity: None,
        }
    }

    pub fn with_activity(mut self, activity: ActivityLog) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        let ToolInvocation { tool_id, arguments } = invocation;
        let span = tracing::info_span!("tool", id = %tool_id);

        async move {
            let Some(entry) = self.registry.entry(&tool_id) else {
                warn!("rejected invocation of unregistered tool");
                return ToolResult::failure(&ToolError::UnknownTool { id: tool_id });
            };

            let payload = Value::Object(arguments.clone());
            let outcome = match validate(&entry.definition, arguments) {
                Ok(args) => {
                    debug!(?args, "arguments validated");
                    entry.handler.execute(args).await
                }
                Err(err) => Err(err),
            };

            let result = match outcome {
                Ok(data) => {
                    info!("tool succeeded");
                    ToolResult::success(data)
                }
                Err(err) => {
                    warn!(kind = ?err.kind(), error = %err, "tool failed");
                    ToolResult::failure(&err)
                }
            };

            if let Some(activity) = &self.activity {
                activity.push(
                    &tool_id,
                    entry.definition.name,
                    payload,
                    result.to_json(),
                    result.ok,
                );
            }
            result
        }
        .instrument(span)
        .await
    }

    pub async fn execute_value(&self, tool_id: &str, arguments: Value) -> ToolResult {
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return ToolResult::failure(&ToolError::invalid(
                    "arguments",
                    "参数必须是 JSON 对象",
                ))
            }
        };
        self.execute(ToolInvocation::new(tool_id, arguments)).await
    }
}
