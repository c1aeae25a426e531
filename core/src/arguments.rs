use serde_json::{Map, Number, Value};

use crate::error::{ToolError, ToolOutcome};
use crate::registry::{ParamKind, ParamSpec, ToolDefinition};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Map<String, Value>);

impl Args {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// A string argument, treating empty strings as absent.
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn str(&self, key: &str) -> ToolOutcome<&str> {
        self.opt_str(key).ok_or_else(|| ToolError::missing(key))
    }

    pub fn str_or<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.opt_str(key).unwrap_or(fallback)
    }

    pub fn opt_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn opt_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn opt_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn array(&self, key: &str) -> ToolOutcome<&Vec<Value>> {
        self.get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::invalid(key, format!("{key} 必须是数组")))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Args {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Checks required fields, coerces values to their declared kinds and fills
/// in defaults. Keys the schema does not mention pass through unchanged.
pub fn validate(definition: &ToolDefinition, raw: Map<String, Value>) -> ToolOutcome<Args> {
    let mut args = raw;
    for spec in &definition.parameter_schema {
        if is_missing(args.get(spec.key)) {
            if spec.required {
                return Err(match spec.missing_message {
                    Some(message) => ToolError::invalid(spec.key, message),
                    None => ToolError::missing(spec.key),
                });
            }
            match &spec.default {
                Some(default) => {
                    args.insert(spec.key.to_string(), default.clone());
                }
                None => {
                    args.remove(spec.key);
                }
            }
            continue;
        }
        if let Some(value) = args.remove(spec.key) {
            let coerced = coerce(spec, value)?;
            args.insert(spec.key.to_string(), coerced);
        }
    }
    Ok(Args(args))
}

fn malformed(spec: &ParamSpec, expected: &str) -> ToolError {
    ToolError::invalid(spec.key, format!("参数 {} 格式错误，应为{expected}", spec.key))
}

fn coerce(spec: &ParamSpec, value: Value) -> ToolOutcome<Value> {
    match &spec.kind {
        ParamKind::Text | ParamKind::File => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(malformed(spec, "文本")),
        },
        ParamKind::Number => match value {
            Value::Number(_) => Ok(value),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| malformed(spec, "数字")),
            _ => Err(malformed(spec, "数字")),
        },
        ParamKind::Integer => {
            let parsed = match &value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            parsed
                .map(|i| Value::Number(i.into()))
                .ok_or_else(|| malformed(spec, "整数"))
        }
        ParamKind::Boolean => match value {
            Value::Bool(_) => Ok(value),
            Value::String(s) => match s.trim() {
                "true" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "off" | "0" => Ok(Value::Bool(false)),
                _ => Err(malformed(spec, "布尔值")),
            },
            _ => Err(malformed(spec, "布尔值")),
        },
        ParamKind::Json => match value {
            Value::String(s) => {
                serde_json::from_str(&s).map_err(|_| malformed(spec, " JSON"))
            }
            other => Ok(other),
        },
        ParamKind::Select { options } => {
            let chosen = match &value {
                Value::String(s) => s.as_str(),
                _ => return Err(malformed(spec, "文本")),
            };
            if options.iter().any(|o| *o == chosen) {
                Ok(value)
            } else {
                Err(ToolError::invalid(
                    spec.key,
                    format!("参数 {} 不支持的取值: {chosen}", spec.key),
                ))
            }
        }
    }
}
