use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Map, Value};
use workbench_core::{Args, Category, ParamSpec, ToolDefinition, ToolError, ToolHandler, ToolOutcome};

use crate::context::{display_name, ToolContext};

const PREVIEW_CHARS: usize = 2000;

pub fn text_definition() -> ToolDefinition {
    ToolDefinition::new("text-process", "文本处理", Category::Content, "字数统计与大小写转换")
        .param(ParamSpec::select("mode", &["count", "upper", "lower"]).default_value(json!("count")))
        .param(ParamSpec::text("text").required())
}

pub fn convert_definition() -> ToolDefinition {
    ToolDefinition::new("convert", "JSON/CSV 转换", Category::Data, "JSON 与 CSV 互转")
        .param(ParamSpec::select("mode", &["json2csv", "csv2json"]).default_value(json!("json2csv")))
        .param(ParamSpec::text("content").required())
}

pub fn time_definition() -> ToolDefinition {
    ToolDefinition::new("time", "时间解析", Category::Data, "解析日期并输出多种格式")
        .param(ParamSpec::text("iso").required())
}

pub fn chart_definition() -> ToolDefinition {
    ToolDefinition::new("data-viz", "数据可视化", Category::Data, "生成柱状图/折线图/饼图数据")
        .param(ParamSpec::select("type", &["bar", "line", "pie"]).default_value(json!("bar")))
        .param(ParamSpec::json("data").required())
}

pub fn document_definition() -> ToolDefinition {
    ToolDefinition::new("doc-create", "文档生成", Category::Files, "生成 Markdown/TXT/JSON 文档")
        .param(ParamSpec::select("format", &["md", "txt", "json"]).default_value(json!("md")))
        .param(ParamSpec::text("content").required())
}

pub fn file_read_definition() -> ToolDefinition {
    ToolDefinition::new("file-read", "文件读取", Category::Files, "预览上传文件的文本内容")
        .param(ParamSpec::file("file").required().missing_message("请选择文件"))
}

pub async fn text_process(args: Args) -> ToolOutcome<Value> {
    let text = args.str("text")?;
    let data = match args.str_or("mode", "count") {
        "upper" => json!(text.to_uppercase()),
        "lower" => json!(text.to_lowercase()),
        _ => json!({
            "chars": text.chars().count(),
            "words": text.split_whitespace().count(),
        }),
    };
    Ok(json!({ "data": data }))
}

// Column order is the order keys are first seen across all rows.
pub fn json_to_csv(rows: &[Value]) -> ToolOutcome<String> {
    let mut keys: Vec<&str> = Vec::new();
    for row in rows {
        let object = row
            .as_object()
            .ok_or_else(|| ToolError::invalid("content", "JSON 数组的每一项必须是对象"))?;
        for key in object.keys() {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }
    }

    let header: Vec<String> = keys.iter().map(|key| header_cell(key)).collect();
    let mut lines = vec![header.join(",")];
    for row in rows {
        let cells: Vec<String> = keys
            .iter()
            .map(|key| match row.get(*key) {
                None | Some(Value::Null) => "\"\"".to_string(),
                Some(value) => value.to_string(),
            })
            .collect();
        lines.push(cells.join(","));
    }
    Ok(lines.join("\n"))
}

fn header_cell(key: &str) -> String {
    if key.contains([',', '"', '\\']) {
        Value::from(key).to_string()
    } else {
        key.to_string()
    }
}

fn parse_header_cell(cell: &str) -> String {
    let cell = cell.trim();
    if cell.starts_with('"') {
        if let Ok(key) = serde_json::from_str::<String>(cell) {
            return key;
        }
    }
    cell.to_string()
}

fn split_cells(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in line.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' if quoted => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                quoted = !quoted;
            }
            ',' if !quoted => cells.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    cells.push(current);
    cells
}

fn parse_cell(cell: &str) -> Value {
    let cell = cell.trim();
    if cell.is_empty() {
        return json!("");
    }
    serde_json::from_str(cell).unwrap_or_else(|_| json!(cell))
}

pub fn csv_to_json(content: &str) -> Vec<Value> {
    let mut lines = content.trim().lines();
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let keys: Vec<String> = split_cells(header)
        .iter()
        .map(|cell| parse_header_cell(cell))
        .collect();
    lines
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let row: Map<String, Value> = keys
                .iter()
                .zip(split_cells(line))
                .map(|(key, cell)| (key.clone(), parse_cell(&cell)))
                .collect();
            Value::Object(row)
        })
        .collect()
}

pub struct ConvertTool {
    ctx: Arc<ToolContext>,
}

impl ConvertTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for ConvertTool {
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        let content = args.str("content")?;
        let millis = Utc::now().timestamp_millis();

        if args.str_or("mode", "json2csv") == "csv2json" {
            let items = csv_to_json(content);
            let output = serde_json::to_string_pretty(&items)
                .map_err(|e| ToolError::internal("JSON 序列化失败", e))?;
            let published = self
                .ctx
                .publish(output.as_bytes(), &format!("converted_{millis}.json"), "application/json")
                .await?;
            return Ok(json!({
                "items": items.len(),
                "output": items,
                "filename": published.filename,
                "downloadUrl": published.download_url,
            }));
        }

        let parsed: Value = serde_json::from_str(content)
            .map_err(|_| ToolError::invalid("content", "JSON 解析失败"))?;
        let rows = parsed
            .as_array()
            .ok_or_else(|| ToolError::invalid("content", "content 必须是 JSON 数组"))?;
        let csv = json_to_csv(rows)?;
        let published = self
            .ctx
            .publish(csv.as_bytes(), &format!("converted_{millis}.csv"), "text/csv")
            .await?;
        Ok(json!({
            "lines": rows.len(),
            "output": csv,
            "filename": published.filename,
            "downloadUrl": published.download_url,
        }))
    }
}

// Accepts RFC 3339, naive date-times (read as UTC), plain dates and epoch
// milliseconds.
pub fn parse_instant(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    input
        .parse::<i64>()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
}

pub async fn time(args: Args) -> ToolOutcome<Value> {
    let iso = args.str("iso")?;
    let instant = parse_instant(iso).ok_or_else(|| ToolError::invalid("iso", "无效日期"))?;
    Ok(json!({
        "iso": instant.to_rfc3339_opts(SecondsFormat::Millis, true),
        "locale": instant.format("%Y/%-m/%-d %H:%M:%S").to_string(),
        "timestamp": instant.timestamp_millis(),
    }))
}

pub async fn chart(args: Args) -> ToolOutcome<Value> {
    let data = args.array("data")?;
    Ok(json!({
        "chartType": args.str_or("type", "bar"),
        "chartData": data,
    }))
}

pub struct DocumentTool {
    ctx: Arc<ToolContext>,
}

impl DocumentTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for DocumentTool {
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        let content = args.str("content")?;
        let format = args.str_or("format", "md");
        let now = Utc::now();
        let name = format!("document_{}.{format}", now.timestamp_millis());

        let (text, mime) = match format {
            "json" => {
                let body = json!({ "content": content, "ts": now.timestamp_millis() });
                let text = serde_json::to_string_pretty(&body)
                    .map_err(|e| ToolError::internal("JSON 序列化失败", e))?;
                (text, "application/json")
            }
            "txt" => (content.to_string(), "text/plain"),
            _ => (content.to_string(), "text/markdown"),
        };
        let published = self.ctx.publish(text.as_bytes(), &name, mime).await?;

        Ok(json!({
            "notice": format!("已生成 {name}"),
            "filename": published.filename,
            "downloadUrl": published.download_url,
            "fileSize": published.file_size,
        }))
    }
}

pub struct FileReadTool {
    ctx: Arc<ToolContext>,
}

impl FileReadTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for FileReadTool {
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        let file = args.str("file")?;
        let bytes = self.ctx.uploads.read(file).await?;
        let preview: String = String::from_utf8_lossy(&bytes).chars().take(PREVIEW_CHARS).collect();
        Ok(json!({
            "name": display_name(file),
            "size": bytes.len(),
            "preview": preview,
        }))
    }
}
