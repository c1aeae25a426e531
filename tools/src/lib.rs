pub mod aspose;
pub mod context;
pub mod file_ops;
pub mod image_gen;
pub mod local;
pub mod math;
pub mod piston;
pub mod search;
pub mod voice;
pub mod weather;
pub mod workflows;

use std::sync::Arc;

use workbench_core::{ToolOutcome, ToolRegistry};

pub use context::{Published, ToolContext};

pub fn builtin_registry(ctx: Arc<ToolContext>) -> ToolOutcome<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    registry.register(search::definition(), search::WebSearchTool::new(ctx.clone()))?;
    registry.register(piston::definition(), piston::CodeExecTool::new(ctx.clone()))?;
    registry.register(math::definition(), math::MathTool)?;
    registry.register(image_gen::definition(), image_gen::ImageGenTool::new(ctx.clone()))?;

    registry.register(local::file_read_definition(), local::FileReadTool::new(ctx.clone()))?;
    registry.register(local::document_definition(), local::DocumentTool::new(ctx.clone()))?;
    registry.register(aspose::ppt_definition(), aspose::PresentationTool::new(ctx.clone()))?;
    registry.register(aspose::convert_definition(), aspose::ConvertTool::new(ctx.clone()))?;
    registry.register(aspose::pdf_definition(), aspose::PdfTextTool::new(ctx.clone()))?;

    registry.register(aspose::ocr_definition(), aspose::OcrTool::new(ctx.clone()))?;
    registry.register(aspose::qrcode_definition(), aspose::QrCodeTool::new(ctx.clone()))?;
    registry.register(local::text_definition(), local::text_process)?;
    registry.register(voice::definition(), voice::TtsTool::new(ctx.clone()))?;

    registry.register(local::chart_definition(), local::chart)?;
    registry.register(local::convert_definition(), local::ConvertTool::new(ctx.clone()))?;
    registry.register(local::time_definition(), local::time)?;

    registry.register(weather::definition(), weather::forecast)?;
    registry.register(file_ops::definition(), file_ops::FileOpsTool::new(ctx))?;

    tracing::info!(tools = registry.len(), "Tool catalog ready");
    Ok(registry)
}
