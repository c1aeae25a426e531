use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use workbench_core::{Args, Category, ParamSpec, ToolDefinition, ToolError, ToolHandler, ToolOutcome};

use crate::context::{display_name, ensure_success, transport, ToolContext};

const SERVICE: &str = "Aspose";
const PPTX_MIME: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";

pub fn ppt_definition() -> ToolDefinition {
    ToolDefinition::new("ppt-create", "PPT 生成", Category::Files, "创建 PowerPoint 演示文稿")
        .param(ParamSpec::text("title"))
        .param(ParamSpec::json("slides").required().missing_message("必须提供 slides 数组"))
}

pub fn convert_definition() -> ToolDefinition {
    ToolDefinition::new("doc-convert", "文档转换", Category::Files, "Word/Excel/PPT/PDF 格式互转")
        .param(ParamSpec::file("file").required().missing_message("必须提供文件和目标格式"))
        .param(
            ParamSpec::select("format", &["pdf", "docx", "xlsx", "pptx", "html", "txt", "png", "jpg"])
                .required()
                .missing_message("必须提供文件和目标格式"),
        )
        .param(ParamSpec::text("output_filename"))
}

pub fn pdf_definition() -> ToolDefinition {
    ToolDefinition::new("pdf-extract", "PDF 文本提取", Category::Files, "提取 PDF 文件中的文本内容")
        .param(ParamSpec::file("file").required().missing_message("必须提供 PDF 文件"))
        .param(ParamSpec::integer("page"))
}

pub fn ocr_definition() -> ToolDefinition {
    ToolDefinition::new("ocr-aspose", "OCR 识别", Category::Content, "Aspose OCR 高精度文字识别")
        .param(ParamSpec::file("file").required().missing_message("必须提供图片文件"))
        .param(ParamSpec::select("language", &["auto", "chinese", "english"]).default_value(json!("auto")))
}

pub fn qrcode_definition() -> ToolDefinition {
    ToolDefinition::new("qrcode-gen", "二维码生成", Category::Content, "生成二维码图片")
        .param(ParamSpec::text("text").required().missing_message("必须提供要编码的文本或链接"))
        .param(ParamSpec::integer("size").default_value(json!(300)))
        .param(ParamSpec::text("filename"))
}

pub fn mime_for(format: &str) -> &'static str {
    match format {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => PPTX_MIME,
        "html" => "text/html",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn extension(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

fn stem(name: &str) -> &str {
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}

// Keeps word characters and CJK ideographs, replacing everything else.
fn presentation_name(title: Option<&str>) -> String {
    match title {
        Some(title) => title
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || ('\u{4e00}'..='\u{9fa5}').contains(&c) {
                    c
                } else {
                    '_'
                }
            })
            .collect(),
        None => format!("presentation_{}", Utc::now().timestamp_millis()),
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

struct AsposeSession<'a> {
    ctx: &'a ToolContext,
    token: String,
}

impl<'a> AsposeSession<'a> {
    async fn connect(ctx: &'a ToolContext) -> ToolOutcome<Self> {
        let (client_id, client_secret) = ctx
            .settings
            .aspose_credentials()
            .ok_or_else(|| ToolError::upstream("未配置 Aspose 凭据 (ASPOSE_CLIENT_ID / ASPOSE_CLIENT_SECRET)"))?;

        let url = Self::build_url(&ctx.settings.aspose_base_url, &["connect", "token"])?;
        let response = ctx
            .http
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(transport("获取 Aspose Token"))?;
        let response = ensure_success(response, "获取 Aspose Token").await?;
        let token: TokenResponse = response.json().await.map_err(transport("获取 Aspose Token"))?;
        info!("Aspose token acquired");
        Ok(Self {
            ctx,
            token: token.access_token,
        })
    }

    fn build_url(base: &str, segments: &[&str]) -> ToolOutcome<Url> {
        let mut url = Url::parse(base).map_err(|e| ToolError::internal("Aspose 地址无效", e))?;
        url.path_segments_mut()
            .map_err(|_| ToolError::internal("Aspose 地址无效", base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn url(&self, segments: &[&str]) -> ToolOutcome<Url> {
        Self::build_url(&self.ctx.settings.aspose_base_url, segments)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.token)
    }

    async fn send(&self, builder: RequestBuilder) -> ToolOutcome<reqwest::Response> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(transport(SERVICE))?;
        ensure_success(response, SERVICE).await
    }

    async fn send_json(&self, builder: RequestBuilder) -> ToolOutcome<Value> {
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(transport(SERVICE))
    }

    async fn send_bytes(&self, builder: RequestBuilder) -> ToolOutcome<Vec<u8>> {
        let bytes = self
            .send(builder)
            .await?
            .bytes()
            .await
            .map_err(transport(SERVICE))?;
        Ok(bytes.to_vec())
    }

    async fn add_slide(&self, pptx: &str, layout: &str) -> ToolOutcome<()> {
        let url = self.url(&["v3.0", "slides", pptx, "slides"])?;
        self.send(self.ctx.http.post(url).json(&json!({ "layoutSlide": { "type": layout } })))
            .await?;
        Ok(())
    }

    async fn add_text_box(
        &self,
        pptx: &str,
        index: usize,
        text: &str,
        (x, y, width, height): (u32, u32, u32, u32),
        centered: bool,
    ) -> ToolOutcome<()> {
        let index = index.to_string();
        let url = self.url(&["v3.0", "slides", pptx, "slides", &index, "shapes"])?;
        let shape = json!({
            "shapeType": "Rectangle",
            "x": x,
            "y": y,
            "width": width,
            "height": height,
            "text": text,
            "textFrameFormat": { "centerText": if centered { "True" } else { "False" } },
        });
        self.send(self.ctx.http.post(url).json(&shape)).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SlideInput {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

pub struct PresentationTool {
    ctx: Arc<ToolContext>,
}

impl PresentationTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for PresentationTool {
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        let slides: Vec<SlideInput> = serde_json::from_value(Value::Array(args.array("slides")?.clone()))
            .map_err(|_| ToolError::invalid("slides", "slides 每一项必须包含 title 和 content"))?;
        let title = args.opt_str("title");
        let pptx = format!("{}.pptx", presentation_name(title));

        info!(file = %pptx, slides = slides.len(), "Creating presentation");
        let session = AsposeSession::connect(&self.ctx).await?;
        let http = &self.ctx.http;

        session
            .send(http.post(session.url(&["v3.0", "slides", &pptx])?).timeout(Duration::from_secs(30)))
            .await?;
        // Aspose creates a blank first slide.
        session
            .send(http.delete(session.url(&["v3.0", "slides", &pptx, "slides", "1"])?))
            .await?;

        let mut offset = 0;
        if let Some(title) = title {
            session.add_slide(&pptx, "Title").await?;
            session.add_text_box(&pptx, 1, title, (50, 150, 600, 100), true).await?;
            offset = 1;
        }
        for (i, slide) in slides.iter().enumerate() {
            let index = i + 1 + offset;
            session.add_slide(&pptx, "TitleAndObject").await?;
            session
                .add_text_box(&pptx, index, &slide.title, (50, 40, 620, 60), false)
                .await?;
            session
                .add_text_box(&pptx, index, &slide.content, (50, 120, 620, 360), false)
                .await?;
            info!("Added slide {}/{}: {}", i + 1, slides.len(), slide.title);
        }

        let bytes = session
            .send_bytes(http.get(session.url(&["v3.0", "slides", &pptx])?).timeout(Duration::from_secs(60)))
            .await?;
        let published = self.ctx.publish(&bytes, &pptx, PPTX_MIME).await?;

        Ok(json!({
            "success": true,
            "filename": published.filename,
            "path": published.path,
            "downloadUrl": published.download_url,
            "slides": slides.len(),
            "note": format!("演示文稿创建成功，共 {} 张幻灯片", slides.len()),
        }))
    }
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
        let file = args.str("file")?;
        let format = args.str("format")?;
        let input_name = display_name(file);
        let input_ext = extension(input_name);

        let segments: Vec<&str> = match input_ext.as_str() {
            "docx" | "doc" => vec!["v4.0", "words", "convert"],
            "xlsx" | "xls" => vec!["v3.0", "cells", "convert"],
            "pptx" | "ppt" => vec!["v3.0", "slides", "convert", format],
            "pdf" => vec!["v3.0", "pdf", "convert", format],
            other => {
                return Err(ToolError::invalid("file", format!("不支持的文件类型: .{other}")));
            }
        };
        let bytes = self.ctx.uploads.read(file).await?;

        info!(input = input_name, format, "Converting document");
        let session = AsposeSession::connect(&self.ctx).await?;
        let mut url = session.url(&segments)?;
        if matches!(input_ext.as_str(), "docx" | "doc" | "xlsx" | "xls") {
            url.query_pairs_mut().append_pair("format", format);
        }
        let converted = session
            .send_bytes(
                self.ctx
                    .http
                    .put(url)
                    .header("Content-Type", "application/octet-stream")
                    .body(bytes)
                    .timeout(Duration::from_secs(60)),
            )
            .await?;

        let output_name = match args.opt_str("output_filename") {
            Some(name) => format!("{name}.{format}"),
            None => format!("{}.{format}", stem(input_name)),
        };
        let published = self.ctx.publish(&converted, &output_name, mime_for(format)).await?;

        Ok(json!({
            "success": true,
            "inputFile": input_name,
            "outputFile": published.filename,
            "outputFormat": format,
            "path": published.path,
            "downloadUrl": published.download_url,
            "size": published.file_size,
            "note": format!("文档已转换为 {} 格式", format.to_uppercase()),
        }))
    }
}

pub struct PdfTextTool {
    ctx: Arc<ToolContext>,
}

impl PdfTextTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

// Joins `text.textItems.list[].text` from an Aspose PDF text response.
fn joined_text_items(body: &Value) -> String {
    body.pointer("/text/textItems/list")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

#[async_trait]
impl ToolHandler for PdfTextTool {
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        let file = args.str("file")?;
        let page = args.opt_i64("page").filter(|p| *p > 0);
        let bytes = self.ctx.uploads.read(file).await?;

        info!(file, ?page, "Extracting PDF text");
        let session = AsposeSession::connect(&self.ctx).await?;
        let http = &self.ctx.http;
        let storage = session.url(&["v3.0", "pdf", "storage", "file", file])?;
        session.send(http.put(storage.clone()).body(bytes)).await?;

        let page_str = page.map(|p| p.to_string());
        let text_url = match &page_str {
            Some(p) => session.url(&["v3.0", "pdf", file, "pages", p, "text"])?,
            None => session.url(&["v3.0", "pdf", file, "text"])?,
        };
        let body = session.send_json(http.get(text_url)).await;

        // Best effort: the remote copy is only needed for the extraction above.
        if let Err(e) = session.send(http.delete(storage)).await {
            warn!(error = %e, "Failed to delete remote PDF copy");
        }

        let text = joined_text_items(&body?);
        let length = text.chars().count();
        Ok(json!({
            "success": true,
            "filename": display_name(file),
            "page": page.map(Value::from).unwrap_or_else(|| json!("全部")),
            "text": text,
            "length": length,
            "note": format!("成功提取 {length} 字符"),
        }))
    }
}

pub struct OcrTool {
    ctx: Arc<ToolContext>,
}

impl OcrTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for OcrTool {
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        let file = args.str("file")?;
        let language = args.str_or("language", "auto");
        let remote_language = match language {
            "chinese" => "Chinese",
            "english" => "English",
            _ => "Auto",
        };
        let bytes = self.ctx.uploads.read(file).await?;

        info!(file, language, "Running OCR");
        let session = AsposeSession::connect(&self.ctx).await?;
        let url = session.url(&["v5.0", "ocr", "RecognizeImage"])?;
        let body = session
            .send_json(
                self.ctx
                    .http
                    .post(url)
                    .query(&[
                        ("language", remote_language),
                        ("makeSkewCorrect", "true"),
                        ("makeBinarization", "true"),
                    ])
                    .header("Content-Type", "application/octet-stream")
                    .body(bytes)
                    .timeout(Duration::from_secs(60)),
            )
            .await?;

        let text = body.get("text").and_then(Value::as_str).unwrap_or_default();
        let length = text.chars().count();
        Ok(json!({
            "success": true,
            "filename": display_name(file),
            "language": language,
            "text": text,
            "length": length,
            "note": format!("成功识别 {length} 字符"),
        }))
    }
}

pub struct QrCodeTool {
    ctx: Arc<ToolContext>,
}

impl QrCodeTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for QrCodeTool {
    async fn execute(&self, args: Args) -> ToolOutcome<Value> {
        let text = args.str("text")?;
        let size = args.opt_i64("size").unwrap_or(300).clamp(50, 2000);
        let filename = match args.opt_str("filename") {
            Some(name) => format!("{}.png", stem(name)),
            None => format!("qrcode_{}.png", Utc::now().timestamp_millis()),
        };

        let session = AsposeSession::connect(&self.ctx).await?;
        let url = session.url(&["v3.0", "barcode", "generate"])?;
        let size_str = size.to_string();
        let png = session
            .send_bytes(
                self.ctx
                    .http
                    .get(url)
                    .query(&[
                        ("type", "QR"),
                        ("text", text),
                        ("format", "png"),
                        ("resolutionX", size_str.as_str()),
                        ("resolutionY", size_str.as_str()),
                    ])
                    .timeout(Duration::from_secs(30)),
            )
            .await?;
        let published = self.ctx.publish(&png, &filename, "image/png").await?;

        Ok(json!({
            "success": true,
            "filename": published.filename,
            "text": text,
            "size": format!("{size}x{size}"),
            "path": published.path,
            "downloadUrl": published.download_url,
            "fileSize": published.file_size,
            "note": format!("二维码已生成 ({size}x{size} px)"),
        }))
    }
}
