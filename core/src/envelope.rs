use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::error::{ErrorKind, ToolError};

/// The uniform result of a tool invocation.
///
/// Serializes flat: `{ "ok": true, ...data }` when `data` is an object,
/// `{ "ok": true, "data": ... }` otherwise, and `{ "ok": false, "error": ..,
/// "message": .. }` on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub ok: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub message: Option<String>,
    kind: Option<ErrorKind>,
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            message: None,
            kind: None,
        }
    }

    pub fn failure(err: &ToolError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(err.to_string()),
            message: err.detail().map(str::to_owned),
            kind: Some(err.kind()),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }

    pub fn to_json(&self) -> Value {
        // Serialize on this type cannot fail: every field is already a Value or String.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for ToolResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("ok", &self.ok)?;
        match &self.data {
            Some(Value::Object(fields)) => {
                for (key, value) in fields {
                    if key != "ok" {
                        map.serialize_entry(key, value)?;
                    }
                }
            }
            Some(other) => map.serialize_entry("data", other)?,
            None => {}
        }
        if let Some(error) = &self.error {
            map.serialize_entry("error", error)?;
        }
        if let Some(message) = &self.message {
            map.serialize_entry("message", message)?;
        }
        map.end()
    }
}
