use serde::Serialize;
use serde_json::{json, Value};
use workbench_core::{Args, Category, ParamSpec, ToolDefinition, ToolOutcome};

pub fn definition() -> ToolDefinition {
    ToolDefinition::new("weather-demo", "天气示例", Category::Demo, "演示用的三日天气预报")
        .param(ParamSpec::text("city").default_value(json!("示例市")))
}

#[derive(Debug, Clone, Serialize)]
pub struct Forecast {
    pub day: &'static str,
    pub high: i32,
    pub low: i32,
    pub desc: &'static str,
}

const FORECAST: [Forecast; 3] = [
    Forecast { day: "周一", high: 25, low: 17, desc: "多云" },
    Forecast { day: "周二", high: 27, low: 18, desc: "晴" },
    Forecast { day: "周三", high: 23, low: 16, desc: "小雨" },
];

// Fixed placeholder data; only the city name echoes the input.
pub async fn forecast(args: Args) -> ToolOutcome<Value> {
    Ok(json!({
        "city": args.str_or("city", "示例市"),
        "days": FORECAST,
    }))
}
