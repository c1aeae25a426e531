use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::arguments::Args;
use crate::error::{ToolError, ToolOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Basic,
    Files,
    Content,
    Data,
    Demo,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Self::Basic => "基础",
            Self::Files => "文件",
            Self::Content => "内容",
            Self::Data => "数据",
            Self::Demo => "演示",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    Text,
    Number,
    Integer,
    Boolean,
    // Structured JSON (array or object); strings are parsed.
    Json,
    // Name of a file previously staged in the uploads directory.
    File,
    Select { options: Vec<&'static str> },
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub key: &'static str,
    #[serde(flatten)]
    pub kind: ParamKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip)]
    pub missing_message: Option<&'static str>,
}

impl ParamSpec {
    fn new(key: &'static str, kind: ParamKind) -> Self {
        Self {
            key,
            kind,
            required: false,
            default: None,
            missing_message: None,
        }
    }

    pub fn text(key: &'static str) -> Self {
        Self::new(key, ParamKind::Text)
    }

    pub fn number(key: &'static str) -> Self {
        Self::new(key, ParamKind::Number)
    }

    pub fn integer(key: &'static str) -> Self {
        Self::new(key, ParamKind::Integer)
    }

    pub fn boolean(key: &'static str) -> Self {
        Self::new(key, ParamKind::Boolean)
    }

    pub fn json(key: &'static str) -> Self {
        Self::new(key, ParamKind::Json)
    }

    pub fn file(key: &'static str) -> Self {
        Self::new(key, ParamKind::File)
    }

    pub fn select(key: &'static str, options: &[&'static str]) -> Self {
        Self::new(
            key,
            ParamKind::Select {
                options: options.to_vec(),
            },
        )
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Overrides the message reported when this required field is absent.
    pub fn missing_message(mut self, message: &'static str) -> Self {
        self.missing_message = Some(message);
        self
    }

    fn json_schema(&self) -> Value {
        let mut schema = match &self.kind {
            ParamKind::Text => json!({ "type": "string" }),
            ParamKind::Number => json!({ "type": "number" }),
            ParamKind::Integer => json!({ "type": "integer" }),
            ParamKind::Boolean => json!({ "type": "boolean" }),
            ParamKind::Json => json!({}),
            ParamKind::File => json!({
                "type": "string",
                "description": "name of an uploaded file",
            }),
            ParamKind::Select { options } => json!({ "type": "string", "enum": options }),
        };
        if let (Some(default), Some(obj)) = (&self.default, schema.as_object_mut()) {
            obj.insert("default".into(), default.clone());
        }
        schema
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: Category,
    #[serde(rename = "params")]
    pub parameter_schema: Vec<ParamSpec>,
}

impl ToolDefinition {
    pub fn new(
        id: &'static str,
        name: &'static str,
        category: Category,
        description: &'static str,
    ) -> Self {
        Self {
            id,
            name,
            description,
            category,
            parameter_schema: Vec::new(),
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.parameter_schema.push(spec);
        self
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.parameter_schema.iter().filter(|p| p.required)
    }

    pub fn json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameter_schema
            .iter()
            .map(|p| (p.key.to_string(), p.json_schema()))
            .collect();
        let required: Vec<&str> = self.required_params().map(|p| p.key).collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, args: Args) -> ToolOutcome<Value>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Send + Sync + Fn(Args) -> Fut,
    Fut: Future<Output = ToolOutcome<Value>> + Send,
{
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        (self)(args).await
    }
}

#[derive(Clone)]
pub struct ToolEntry {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn ToolHandler>,
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    order: Vec<&'static str>,
    entries: HashMap<&'static str, ToolEntry>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("registered", &self.order)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, definition: ToolDefinition, handler: H) -> ToolOutcome<()>
    where
        H: ToolHandler + 'static,
    {
        let id = definition.id;
        if self.entries.contains_key(id) {
            return Err(ToolError::DuplicateTool { id: id.to_string() });
        }
        self.order.push(id);
        self.entries.insert(
            id,
            ToolEntry {
                definition,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Option<&ToolDefinition> {
        self.entries.get(id).map(|e| &e.definition)
    }

    pub fn entry(&self, id: &str) -> Option<&ToolEntry> {
        self.entries.get(id)
    }

    pub fn list(&self) -> Vec<&ToolDefinition> {
        self.order
            .iter()
            .filter_map(|id| self.lookup(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
