//! Multi-step tool chains executed over the dispatcher.
//!
//! Step parameters may reference earlier results and workflow variables with
//! `${name.path[0].field}`; a step's envelope is stored as `step_<id>`.
//! Conditions are `<operand> [op <operand>]` checks, never evaluated code.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::error::{ToolError, ToolOutcome};

// Step visits allowed per run; `nextSteps` may form cycles.
const MAX_STEP_RUNS: usize = 100;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    pub start_step: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionKind {
    If,
    IfElse,
}

/// Picks the follow-up steps once the step succeeded. Replaces `nextSteps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    pub expression: String,
    #[serde(default)]
    pub on_true: Vec<String>,
    #[serde(default)]
    pub on_false: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHandling {
    #[serde(default)]
    pub retry: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub workflow: Workflow,
    pub example: &'static str,
}

impl Workflow {
    pub fn new(id: &str, name: &str, start_step: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            steps: Vec::new(),
            start_step: start_step.to_string(),
            variables: Map::new(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn variable(mut self, key: &str, value: Value) -> Self {
        self.variables.insert(key.to_string(), value);
        self
    }

    pub fn find(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    /// Structural checks: unique step ids, every reference resolvable and
    /// every condition parseable.
    pub fn validate(&self) -> ToolOutcome<()> {
        if self.steps.is_empty() {
            return Err(ToolError::invalid("steps", "工作流没有步骤"));
        }
        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(ToolError::invalid("steps", format!("步骤 ID 重复: {}", step.id)));
            }
        }
        if !ids.contains(self.start_step.as_str()) {
            return Err(ToolError::invalid(
                "startStep",
                format!("步骤未找到: {}", self.start_step),
            ));
        }
        for step in &self.steps {
            for target in step.targets() {
                if !ids.contains(target) {
                    return Err(ToolError::invalid(
                        "steps",
                        format!("步骤 {} 引用了不存在的步骤: {target}", step.id),
                    ));
                }
            }
            if let Some(condition) = &step.condition {
                Check::parse(&condition.expression)
                    .map_err(|e| ToolError::invalid("condition", format!("步骤 {}: {e}", step.id)))?;
            }
        }
        Ok(())
    }
}

impl WorkflowStep {
    pub fn new(id: &str, name: &str, tool: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            tool: tool.to_string(),
            params: Map::new(),
            condition: None,
            next_steps: Vec::new(),
            error_handling: None,
        }
    }

    pub fn param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn then(mut self, next: &str) -> Self {
        self.next_steps.push(next.to_string());
        self
    }

    pub fn branch(
        mut self,
        kind: ConditionKind,
        expression: &str,
        on_true: &[&str],
        on_false: &[&str],
    ) -> Self {
        let owned = |ids: &[&str]| -> Vec<String> { ids.iter().map(|id| id.to_string()).collect() };
        self.condition = Some(Condition {
            kind,
            expression: expression.to_string(),
            on_true: owned(on_true),
            on_false: owned(on_false),
        });
        self
    }

    pub fn retry(mut self, times: u32) -> Self {
        self.error_handling.get_or_insert_with(Default::default).retry = times;
        self
    }

    pub fn fallback(mut self, step: &str) -> Self {
        self.error_handling.get_or_insert_with(Default::default).fallback = Some(step.to_string());
        self
    }

    fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    fn targets(&self) -> impl Iterator<Item = &str> {
        let branches = self
            .condition
            .iter()
            .flat_map(|c| c.on_true.iter().chain(c.on_false.iter()));
        let fallback = self.error_handling.iter().filter_map(|e| e.fallback.as_ref());
        self.next_steps
            .iter()
            .chain(branches)
            .chain(fallback)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub step: String,
    pub message: String,
    pub level: LogLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepError {
    pub step: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub results: Map<String, Value>,
    pub errors: Vec<StepError>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub logs: Vec<LogEntry>,
}

impl WorkflowExecution {
    fn start(workflow_id: &str) -> Self {
        Self {
            id: format!("exec_{}", Uuid::new_v4().simple()),
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Running,
            current_step: None,
            results: Map::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            logs: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    fn log(&mut self, level: LogLevel, step: &str, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            step: step.to_string(),
            message: message.into(),
            level,
        });
    }

    fn record_error(&mut self, step: &str, error: impl Into<String>) {
        let error = error.into();
        self.errors.push(StepError {
            step: step.to_string(),
            error: error.clone(),
            timestamp: Utc::now(),
        });
        self.log(LogLevel::Error, step, error);
    }

    fn finish(mut self, status: ExecutionStatus) -> Self {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self
    }
}

#[derive(Clone)]
pub struct WorkflowEngine {
    dispatcher: Arc<Dispatcher>,
    retry_delay: Duration,
}

impl WorkflowEngine {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Fails only when the workflow itself is malformed. Step failures are
    /// reported through the returned execution.
    pub async fn run(
        &self,
        workflow: &Workflow,
        variables: Map<String, Value>,
    ) -> ToolOutcome<WorkflowExecution> {
        workflow.validate()?;
        for step in &workflow.steps {
            if self.dispatcher.registry().lookup(&step.tool).is_none() {
                return Err(ToolError::UnknownTool { id: step.tool.clone() });
            }
        }

        let execution = WorkflowExecution::start(if workflow.id.is_empty() {
            "inline"
        } else {
            workflow.id.as_str()
        });
        let span = tracing::info_span!("workflow", exec = %execution.id, name = %workflow.name);
        Ok(self
            .execute_steps(workflow, variables, execution)
            .instrument(span)
            .await)
    }

    async fn execute_steps(
        &self,
        workflow: &Workflow,
        variables: Map<String, Value>,
        mut execution: WorkflowExecution,
    ) -> WorkflowExecution {
        // 1. Caller variables override the workflow's own.
        let mut scope = workflow.variables.clone();
        scope.extend(variables);
        execution.log(LogLevel::Info, "workflow_start", format!("开始执行工作流: {}", workflow.name));

        // 2. Depth-first from the start step, children in declared order.
        let mut pending = vec![workflow.start_step.clone()];
        let mut visits = 0;
        while let Some(step_id) = pending.pop() {
            visits += 1;
            if visits > MAX_STEP_RUNS {
                execution.record_error("workflow_error", format!("步骤执行次数超过上限 {MAX_STEP_RUNS}"));
                return execution.finish(ExecutionStatus::Failed);
            }
            let Some(step) = workflow.find(&step_id) else {
                execution.record_error("workflow_error", format!("步骤未找到: {step_id}"));
                return execution.finish(ExecutionStatus::Failed);
            };

            match self.run_step(step, &scope, &mut execution).await {
                Ok(result) => {
                    let next = self.follow_up(step, &result, &scope, &mut execution);
                    scope.insert(format!("step_{}", step.id), result);
                    pending.extend(next.into_iter().rev());
                }
                Err(error) => {
                    execution.record_error(&step.id, error);
                    // 3. A fallback replaces the failed step's subtree.
                    match step.error_handling.as_ref().and_then(|e| e.fallback.as_ref()) {
                        Some(fallback) => {
                            execution.log(LogLevel::Info, &step.id, format!("使用降级步骤: {fallback}"));
                            pending.push(fallback.clone());
                        }
                        None => return execution.finish(ExecutionStatus::Failed),
                    }
                }
            }
        }

        execution.current_step = None;
        execution.log(LogLevel::Info, "workflow_complete", "工作流执行完成");
        info!(steps = execution.results.len(), "workflow completed");
        execution.finish(ExecutionStatus::Completed)
    }

    async fn run_step(
        &self,
        step: &WorkflowStep,
        scope: &Map<String, Value>,
        execution: &mut WorkflowExecution,
    ) -> Result<Value, String> {
        execution.current_step = Some(step.id.clone());
        execution.log(LogLevel::Info, &step.id, format!("执行步骤: {}", step.label()));

        let arguments = resolve(&Value::Object(step.params.clone()), scope);
        let retries = step.error_handling.as_ref().map_or(0, |e| e.retry);
        let mut attempt = 0;
        loop {
            let result = self.dispatcher.execute_value(&step.tool, arguments.clone()).await;
            let envelope = result.to_json();
            execution.results.insert(step.id.clone(), envelope.clone());
            if result.ok {
                execution.log(LogLevel::Info, &step.id, format!("步骤完成: {}", step.label()));
                return Ok(envelope);
            }

            let error = result.error.unwrap_or_else(|| "步骤执行失败".to_string());
            if attempt >= retries {
                return Err(error);
            }
            attempt += 1;
            warn!(step = %step.id, attempt, %error, "workflow step failed, retrying");
            execution.log(
                LogLevel::Warning,
                &step.id,
                format!("步骤失败，重试中 ({attempt}/{retries}): {error}"),
            );
            if !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
    }

    fn follow_up(
        &self,
        step: &WorkflowStep,
        result: &Value,
        scope: &Map<String, Value>,
        execution: &mut WorkflowExecution,
    ) -> Vec<String> {
        let Some(condition) = &step.condition else {
            return step.next_steps.clone();
        };
        let holds = match Check::parse(&condition.expression) {
            Ok(check) => check.holds(result, scope),
            Err(e) => {
                execution.record_error("condition_eval", format!("条件评估失败: {e}"));
                false
            }
        };
        execution.log(
            LogLevel::Info,
            &step.id,
            format!("条件 {} 结果: {holds}", condition.expression),
        );
        match (holds, condition.kind) {
            (true, _) => condition.on_true.clone(),
            (false, ConditionKind::IfElse) => condition.on_false.clone(),
            (false, ConditionKind::If) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Key<'a> {
    Field(&'a str),
    Index(usize),
}

// `a.b[0][1].c` → `[a, b, 0, 1, c]`. `None` when brackets are malformed.
fn segments(path: &str) -> Option<Vec<Key<'_>>> {
    let mut keys = Vec::new();
    for part in path.trim().split('.') {
        let (name, mut rest) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            None => (part, ""),
        };
        if !name.is_empty() {
            keys.push(Key::Field(name));
        }
        while !rest.is_empty() {
            let inner = rest.strip_prefix('[')?;
            let end = inner.find(']')?;
            keys.push(Key::Index(inner[..end].trim().parse().ok()?));
            rest = &inner[end + 1..];
        }
    }
    if keys.is_empty() {
        return None;
    }
    Some(keys)
}

fn walk<'a>(start: &'a Value, keys: &[Key<'_>]) -> Option<&'a Value> {
    keys.iter().try_fold(start, |current, key| match key {
        Key::Field(name) => current.get(*name),
        Key::Index(i) => current.get(*i),
    })
}

fn lookup<'a>(scope: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let keys = segments(path)?;
    match keys.split_first()? {
        (Key::Field(name), rest) => walk(scope.get(*name)?, rest),
        _ => None,
    }
}

fn literal(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        return Some(Value::String(text[1..text.len() - 1].to_string()));
    }
    match serde_json::from_str::<Value>(text) {
        Ok(value @ (Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null)) => Some(value),
        _ => None,
    }
}

// `path || fallback || 'literal'`: the first alternative that is set wins.
fn reference(expr: &str, scope: &Map<String, Value>) -> Option<Value> {
    expr.split("||").find_map(|alternative| {
        literal(alternative).or_else(|| {
            lookup(scope, alternative)
                .filter(|value| !value.is_null())
                .cloned()
        })
    })
}

fn resolve(value: &Value, scope: &Map<String, Value>) -> Value {
    match value {
        Value::String(text) => resolve_text(text, scope),
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve(item, scope)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), resolve(item, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_text(text: &str, scope: &Map<String, Value>) -> Value {
    // A lone reference keeps the referenced value's JSON type.
    if let Some(inner) = text.strip_prefix("${").and_then(|t| t.strip_suffix('}')) {
        if !inner.contains('}') {
            return reference(inner, scope).unwrap_or(Value::Null);
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        match reference(&after[..end], scope) {
            Some(Value::String(s)) => out.push_str(&s),
            Some(Value::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Value::String(out)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

// Longest spellings first so `>=` is not read as `>`.
const OPERATORS: [(&str, Op); 8] = [
    ("===", Op::Eq),
    ("!==", Op::Ne),
    ("==", Op::Eq),
    ("!=", Op::Ne),
    (">=", Op::Ge),
    ("<=", Op::Le),
    (">", Op::Gt),
    ("<", Op::Lt),
];

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(Value),
    Path(String),
}

impl Operand {
    fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("条件表达式缺少操作数".to_string());
        }
        if let Some(value) = literal(text) {
            return Ok(Self::Literal(value));
        }
        segments(text).ok_or_else(|| format!("无法解析的路径: {text}"))?;
        Ok(Self::Path(text.to_string()))
    }

    // `result.…` reads the step's own envelope; anything else reads the scope.
    fn value<'a>(&'a self, result: &'a Value, scope: &'a Map<String, Value>) -> Option<&'a Value> {
        match self {
            Self::Literal(value) => Some(value),
            Self::Path(path) => {
                let keys = segments(path)?;
                match keys.split_first()? {
                    (Key::Field("result"), rest) => walk(result, rest),
                    _ => lookup(scope, path),
                }
            }
        }
    }
}

// A single comparison, or a truthiness test when there is no operator.
#[derive(Debug, Clone, PartialEq)]
struct Check {
    left: Operand,
    op: Option<(Op, Operand)>,
}

impl Check {
    fn parse(expression: &str) -> Result<Self, String> {
        if expression.trim().is_empty() {
            return Err("条件表达式为空".to_string());
        }
        for (spelling, op) in OPERATORS {
            if let Some((left, right)) = expression.split_once(spelling) {
                return Ok(Self {
                    left: Operand::parse(left)?,
                    op: Some((op, Operand::parse(right)?)),
                });
            }
        }
        Ok(Self {
            left: Operand::parse(expression)?,
            op: None,
        })
    }

    fn holds(&self, result: &Value, scope: &Map<String, Value>) -> bool {
        let left = self.left.value(result, scope).unwrap_or(&NULL);
        let Some((op, right)) = &self.op else {
            return truthy(left);
        };
        let right = right.value(result, scope).unwrap_or(&NULL);
        match op {
            Op::Eq => same(left, right),
            Op::Ne => !same(left, right),
            ordering => match (left.as_f64(), right.as_f64()) {
                (Some(l), Some(r)) => match ordering {
                    Op::Gt => l > r,
                    Op::Ge => l >= r,
                    Op::Lt => l < r,
                    _ => l <= r,
                },
                _ => false,
            },
        }
    }
}

fn same(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arguments::Args;
    use crate::registry::{Category, ParamSpec, ToolDefinition, ToolRegistry};
    use crate::ErrorKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // `echo` returns its arguments, `flaky` fails until its third call and
    // `broken` always fails.
    fn engine(flaky_calls: Arc<AtomicUsize>) -> WorkflowEngine {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolDefinition::new("echo", "回显", Category::Basic, "返回参数"),
                |args: Args| async move { Ok::<_, ToolError>(json!({ "echo": args.into_value() })) },
            )
            .unwrap();
        registry
            .register(
                ToolDefinition::new("flaky", "不稳定", Category::Basic, "前两次失败"),
                move |_: Args| {
                    let calls = flaky_calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            return Err(ToolError::upstream("暂时不可用"));
                        }
                        Ok(json!({ "value": "recovered" }))
                    }
                },
            )
            .unwrap();
        registry
            .register(
                ToolDefinition::new("broken", "总是失败", Category::Basic, "总是失败")
                    .param(ParamSpec::text("why")),
                |_: Args| async move { Err::<Value, _>(ToolError::upstream("服务故障")) },
            )
            .unwrap();
        WorkflowEngine::new(Arc::new(Dispatcher::new(Arc::new(registry))))
            .with_retry_delay(Duration::ZERO)
    }

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn ran(execution: &WorkflowExecution) -> Vec<&str> {
        let mut ids: Vec<&str> = execution.results.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    #[tokio::test]
    async fn results_flow_into_later_steps() {
        let workflow = Workflow::new("wf", "变量传递", "first")
            .variable("topic", json!("rust"))
            .variable("count", json!(3))
            .step(
                WorkflowStep::new("first", "第一步", "echo")
                    .param("q", json!("${topic}"))
                    .param("tags", json!(["${topic}", 1]))
                    .then("second"),
            )
            .step(
                WorkflowStep::new("second", "第二步", "echo")
                    .param("first", json!("${step_first.echo.q}"))
                    .param("tag", json!("${step_first.echo.tags[1]}"))
                    .param("text", json!("关于 ${topic} 的 ${step_first.missing || '默认'} 共 ${count} 条"))
                    .param("n", json!("${count}"))
                    .param("absent", json!("${nothing}")),
            );

        let execution = engine(Arc::default())
            .run(&workflow, vars(json!({ "count": 5 })))
            .await
            .unwrap();

        assert!(execution.succeeded());
        assert_eq!(execution.workflow_id, "wf");
        assert_eq!(execution.results["first"]["echo"]["tags"], json!(["rust", 1]));
        assert_eq!(
            execution.results["second"],
            json!({
                "ok": true,
                "echo": {
                    "first": "rust",
                    "tag": 1,
                    "text": "关于 rust 的 默认 共 5 条",
                    "n": 5,
                    "absent": null,
                },
            })
        );
        assert_eq!(execution.logs.first().unwrap().step, "workflow_start");
        assert_eq!(execution.logs.last().unwrap().step, "workflow_complete");
        assert!(execution.errors.is_empty());
        assert!(execution.completed_at.is_some());
    }

    #[tokio::test]
    async fn next_steps_run_depth_first_in_order() {
        let workflow = Workflow::new("wf", "顺序", "root")
            .step(WorkflowStep::new("root", "", "echo").then("a").then("b"))
            .step(WorkflowStep::new("a", "", "echo").then("a1"))
            .step(WorkflowStep::new("a1", "", "echo"))
            .step(WorkflowStep::new("b", "", "echo"));

        let execution = engine(Arc::default()).run(&workflow, Map::new()).await.unwrap();
        let started: Vec<&str> = execution
            .logs
            .iter()
            .filter(|log| log.message.starts_with("执行步骤"))
            .map(|log| log.step.as_str())
            .collect();
        assert_eq!(started, ["root", "a", "a1", "b"]);
    }

    #[tokio::test]
    async fn if_else_picks_a_branch() {
        let workflow = |expression: &str| {
            Workflow::new("wf", "分支", "check")
                .step(
                    WorkflowStep::new("check", "判断", "echo")
                        .param("value", json!(7))
                        .branch(ConditionKind::IfElse, expression, &["big"], &["small"]),
                )
                .step(WorkflowStep::new("big", "大", "echo"))
                .step(WorkflowStep::new("small", "小", "echo"))
        };
        let engine = engine(Arc::default());

        let big = engine.run(&workflow("result.echo.value > 5"), Map::new()).await.unwrap();
        assert_eq!(ran(&big), ["big", "check"]);

        let small = engine.run(&workflow("result.echo.value >= 10"), Map::new()).await.unwrap();
        assert_eq!(ran(&small), ["check", "small"]);

        let equal = engine.run(&workflow("result.ok === true"), Map::new()).await.unwrap();
        assert_eq!(ran(&equal), ["big", "check"]);
    }

    #[tokio::test]
    async fn if_without_match_stops_the_branch() {
        let workflow = Workflow::new("wf", "条件", "check")
            .variable("mode", json!("fast"))
            .step(
                WorkflowStep::new("check", "判断", "echo")
                    .branch(ConditionKind::If, "mode == 'slow'", &["slow"], &[]),
            )
            .step(WorkflowStep::new("slow", "慢", "echo"));

        let execution = engine(Arc::default()).run(&workflow, Map::new()).await.unwrap();
        assert!(execution.succeeded());
        assert_eq!(ran(&execution), ["check"]);
    }

    #[tokio::test]
    async fn retries_until_the_step_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let workflow = Workflow::new("wf", "重试", "flaky")
            .step(WorkflowStep::new("flaky", "不稳定", "flaky").retry(2));

        let execution = engine(calls.clone()).run(&workflow, Map::new()).await.unwrap();
        assert!(execution.succeeded());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(execution.results["flaky"]["value"], "recovered");
        let warnings = execution
            .logs
            .iter()
            .filter(|log| log.level == LogLevel::Warning)
            .count();
        assert_eq!(warnings, 2);
    }

    #[tokio::test]
    async fn fallback_runs_after_retries_are_spent() {
        let workflow = Workflow::new("wf", "降级", "main")
            .step(
                WorkflowStep::new("main", "主步骤", "broken")
                    .retry(1)
                    .fallback("rescue")
                    .then("after"),
            )
            .step(WorkflowStep::new("rescue", "降级", "echo").param("why", json!("main failed")))
            .step(WorkflowStep::new("after", "后续", "echo"));

        let execution = engine(Arc::default()).run(&workflow, Map::new()).await.unwrap();
        assert!(execution.succeeded());
        assert_eq!(ran(&execution), ["main", "rescue"]);
        assert_eq!(execution.results["main"]["ok"], false);
        assert_eq!(execution.errors.len(), 1);
        assert_eq!(execution.errors[0].step, "main");
        assert_eq!(execution.errors[0].error, "服务故障");
    }

    #[tokio::test]
    async fn failure_without_fallback_fails_the_run() {
        let workflow = Workflow::new("wf", "失败", "main")
            .step(WorkflowStep::new("main", "主步骤", "broken").then("after"))
            .step(WorkflowStep::new("after", "后续", "echo"));

        let execution = engine(Arc::default()).run(&workflow, Map::new()).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.current_step.as_deref(), Some("main"));
        assert_eq!(ran(&execution), ["main"]);
        assert_eq!(execution.logs.last().unwrap().level, LogLevel::Error);
    }

    #[tokio::test]
    async fn cycles_are_cut_off() {
        let workflow = Workflow::new("wf", "循环", "a")
            .step(WorkflowStep::new("a", "", "echo").then("b"))
            .step(WorkflowStep::new("b", "", "echo").then("a"));

        let execution = engine(Arc::default()).run(&workflow, Map::new()).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.errors[0].step, "workflow_error");
    }

    #[tokio::test]
    async fn malformed_workflows_are_rejected_before_running() {
        let engine = engine(Arc::default());
        let cases = [
            Workflow::new("wf", "空", "a"),
            Workflow::new("wf", "起点", "missing").step(WorkflowStep::new("a", "", "echo")),
            Workflow::new("wf", "重复", "a")
                .step(WorkflowStep::new("a", "", "echo"))
                .step(WorkflowStep::new("a", "", "echo")),
            Workflow::new("wf", "引用", "a").step(WorkflowStep::new("a", "", "echo").then("zzz")),
            Workflow::new("wf", "条件", "a").step(
                WorkflowStep::new("a", "", "echo").branch(ConditionKind::If, "result.x[oops] == 1", &[], &[]),
            ),
        ];
        for workflow in &cases {
            let err = engine.run(workflow, Map::new()).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArguments, "{}", workflow.name);
        }

        let unknown = Workflow::new("wf", "工具", "a").step(WorkflowStep::new("a", "", "nope"));
        let err = engine.run(&unknown, Map::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownTool);
    }

    #[test]
    fn workflows_deserialize_from_camel_case() {
        let workflow: Workflow = serde_json::from_value(json!({
            "name": "demo",
            "startStep": "s1",
            "steps": [{
                "id": "s1",
                "tool": "echo",
                "params": { "q": "${topic}" },
                "condition": { "type": "if-else", "expression": "result.ok", "onTrue": ["s1"] },
                "errorHandling": { "retry": 2, "fallback": "s1" },
            }],
        }))
        .unwrap();
        assert_eq!(workflow.steps[0].condition.as_ref().unwrap().kind, ConditionKind::IfElse);
        assert_eq!(workflow.steps[0].error_handling.as_ref().unwrap().retry, 2);
        assert!(workflow.validate().is_ok());
    }

    #[test]
    fn paths_and_checks_parse() {
        assert_eq!(
            segments("step_s1.results[0].url").unwrap(),
            [Key::Field("step_s1"), Key::Field("results"), Key::Index(0), Key::Field("url")]
        );
        assert!(segments("a[").is_none());
        assert!(Check::parse("").is_err());
        assert!(Check::parse("== 1").is_err());

        let scope = vars(json!({ "n": 3, "name": "x" }));
        let result = json!({ "ok": true, "items": [] });
        let holds = |expr: &str| Check::parse(expr).unwrap().holds(&result, &scope);
        assert!(holds("n != 4"));
        assert!(holds("n <= 3.0"));
        assert!(holds("name == \"x\""));
        assert!(holds("result.items"));
        assert!(!holds("result.missing"));
        assert!(!holds("name > 1"));
    }
}
