use serde_json::json;
use workbench_core::workflow::ConditionKind;
use workbench_core::{Workflow, WorkflowStep, WorkflowTemplate};

pub fn templates() -> Vec<WorkflowTemplate> {
    vec![research(), code_check(), csv_chart()]
}

pub fn template(id: &str) -> Option<WorkflowTemplate> {
    templates().into_iter().find(|t| t.id == id)
}

fn research() -> WorkflowTemplate {
    let workflow = Workflow::new("research_and_summarize", "研究并总结工作流", "search")
        .describe("搜索主题，统计摘要并生成 Markdown 报告")
        .variable("topic", json!("人工智能最新进展"))
        .step(
            WorkflowStep::new("search", "搜索信息", "web-search")
                .param("q", json!("${topic}"))
                .param("count", json!(3))
                .then("measure"),
        )
        .step(
            WorkflowStep::new("measure", "统计摘要", "text-process")
                .param("mode", json!("count"))
                .param("text", json!("${step_search.results[0].snippet || topic}"))
                .then("report"),
        )
        .step(
            WorkflowStep::new("report", "生成报告", "doc-create")
                .param("format", json!("md"))
                .param(
                    "content",
                    json!("# ${topic}\n\n- ${step_search.results[0].title}: ${step_search.results[0].url}\n- 摘要字数: ${step_measure.data.chars}\n"),
                ),
        );

    WorkflowTemplate {
        id: "research_and_summarize",
        name: "研究并总结",
        description: "搜索主题、统计摘要、生成总结报告",
        category: "研究",
        workflow,
        example: "自动搜索某个主题，并把首条结果整理成报告",
    }
}

fn code_check() -> WorkflowTemplate {
    let workflow = Workflow::new("code_analysis", "代码分析工作流", "practices")
        .describe("搜索最佳实践并运行代码，执行失败时生成说明")
        .variable("language", json!("python"))
        .variable("code", json!("print(\"Hello World\")"))
        .step(
            WorkflowStep::new("practices", "搜索最佳实践", "web-search")
                .param("q", json!("${language} 编程最佳实践"))
                .then("run"),
        )
        .step(
            WorkflowStep::new("run", "执行代码", "code-exec")
                .param("code", json!("${code}"))
                .param("language", json!("${language}"))
                .retry(1)
                .fallback("explain")
                .then("measure"),
        )
        .step(
            WorkflowStep::new("measure", "统计输出", "text-process")
                .param("mode", json!("count"))
                .param("text", json!("${step_run.out || '无输出'}")),
        )
        .step(
            WorkflowStep::new("explain", "记录失败", "doc-create")
                .param("format", json!("txt"))
                .param("content", json!("代码执行失败，请检查 Piston 服务。语言: ${language}")),
        );

    WorkflowTemplate {
        id: "code_analysis",
        name: "代码分析和优化",
        description: "搜索最佳实践、执行代码、统计输出",
        category: "编程",
        workflow,
        example: "搜索编程最佳实践并运行代码，失败时生成说明文档",
    }
}

fn csv_chart() -> WorkflowTemplate {
    let workflow = Workflow::new("csv_to_chart", "表格可视化工作流", "parse")
        .describe("把 CSV 转成 JSON，有数据时生成柱状图，否则统计原文")
        .variable("csv", json!("name,value\nA,3\nB,5"))
        .step(
            WorkflowStep::new("parse", "解析 CSV", "convert")
                .param("mode", json!("csv2json"))
                .param("content", json!("${csv}"))
                .branch(ConditionKind::IfElse, "result.items > 0", &["chart"], &["inspect"]),
        )
        .step(
            WorkflowStep::new("chart", "生成图表", "data-viz")
                .param("type", json!("bar"))
                .param("data", json!("${step_parse.output}")),
        )
        .step(
            WorkflowStep::new("inspect", "统计原文", "text-process")
                .param("mode", json!("count"))
                .param("text", json!("${csv}")),
        );

    WorkflowTemplate {
        id: "csv_to_chart",
        name: "数据可视化流水线",
        description: "解析表格数据并生成图表",
        category: "数据",
        workflow,
        example: "粘贴 CSV，自动得到柱状图数据",
    }
}
