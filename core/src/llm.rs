use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequestArgs, FunctionObjectArgs,
    },
    Client,
};
use anyhow::{anyhow, Context, Result};
use async_recursion::async_recursion;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Settings;
use crate::dispatcher::Dispatcher;
use crate::registry::ToolRegistry;

/// Upper bound on model → tool → model round trips per chat turn.
const MAX_TOOL_ROUNDS: usize = 4;

const SYSTEM_PROMPT: &str = "你是工作台里的通用智能体，目标是完成用户的任务。\
需要实时信息、计算、代码运行或文件处理时，调用提供的工具，并基于工具结果作答。";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolTrace {
    pub tool: String,
    pub arguments: Value,
    pub result: Value,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOutcome {
    pub reply: String,
    pub tool_calls: Vec<ToolTrace>,
}

pub struct Brain {
    client: Client<OpenAIConfig>,
    model: String,
}

impl Brain {
    pub fn new(settings: &Settings) -> Result<Self> {
        let api_key = settings
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY must be set in .env")?;

        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&settings.openai_base_url);
        let client = Client::with_config(config);

        info!("Brain connected. Model: {}", settings.openai_model);
        Ok(Self {
            client,
            model: settings.openai_model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn say_hello(&self) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content("Hello! Reply with 'System Online'.")
                    .build()?,
            )])
            .build()?;

        let response = self.client.chat().create(request).await?;
        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    pub fn tool_menu(registry: &ToolRegistry) -> Result<Vec<ChatCompletionTool>> {
        registry
            .list()
            .into_iter()
            .map(|def| {
                let function = FunctionObjectArgs::default()
                    .name(def.id)
                    .description(def.description)
                    .parameters(def.json_schema())
                    .build()?;
                Ok(ChatCompletionToolArgs::default()
                    .r#type(ChatCompletionToolType::Function)
                    .function(function)
                    .build()?)
            })
            .collect()
    }

    /// Runs one chat turn, letting the model call registry tools through the
    /// dispatcher until it answers in text.
    pub async fn chat(
        &self,
        dispatcher: &Dispatcher,
        messages: &[ChatMessage],
        use_tools: bool,
    ) -> Result<ChatOutcome> {
        // 1. System prompt, then the caller's turns
        let mut history = vec![ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_PROMPT)
                .build()?,
        )];
        for message in messages {
            history.push(to_request_message(message)?);
        }

        // 2. Offer the catalog as function tools
        let tools = if use_tools {
            Self::tool_menu(dispatcher.registry())?
        } else {
            Vec::new()
        };

        // 3. Loop until the model answers in text
        let mut trace = Vec::new();
        let reply = self
            .converse(dispatcher, &mut history, &tools, &mut trace, 0)
            .await?;
        Ok(ChatOutcome {
            reply,
            tool_calls: trace,
        })
    }

    #[async_recursion]
    async fn converse(
        &self,
        dispatcher: &Dispatcher,
        history: &mut Vec<ChatCompletionRequestMessage>,
        tools: &[ChatCompletionTool],
        trace: &mut Vec<ToolTrace>,
        round: usize,
    ) -> Result<String> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(history.clone());
        // Past the round limit the model must answer with what it has.
        if !tools.is_empty() && round < MAX_TOOL_ROUNDS {
            builder.tools(tools.to_vec());
        }
        let request = builder.build()?;

        let response = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .first()
            .ok_or_else(|| anyhow!("model returned no choices"))?;

        let calls = match &choice.message.tool_calls {
            Some(calls) if !calls.is_empty() => calls.clone(),
            _ => return Ok(choice.message.content.clone().unwrap_or_default()),
        };

        let mut assistant = ChatCompletionRequestAssistantMessageArgs::default();
        assistant.tool_calls(calls.clone());
        if let Some(content) = &choice.message.content {
            assistant.content(content.clone());
        }
        history.push(ChatCompletionRequestMessage::Assistant(assistant.build()?));

        for call in &calls {
            let output = self.run_call(dispatcher, call, trace).await;
            history.push(ChatCompletionRequestMessage::Tool(
                ChatCompletionRequestToolMessageArgs::default()
                    .content(output)
                    .tool_call_id(call.id.clone())
                    .build()?,
            ));
        }

        self.converse(dispatcher, history, tools, trace, round + 1)
            .await
    }

    async fn run_call(
        &self,
        dispatcher: &Dispatcher,
        call: &ChatCompletionMessageToolCall,
        trace: &mut Vec<ToolTrace>,
    ) -> String {
        let name = call.function.name.as_str();
        let arguments: Value = match serde_json::from_str(&call.function.arguments) {
            Ok(value) => value,
            Err(e) => {
                warn!(tool = name, error = %e, "Model sent unparsable tool arguments");
                Value::Object(Default::default())
            }
        };

        info!("Brain decided to call tool: '{}'", name);
        let result = dispatcher.execute_value(name, arguments.clone()).await;
        let result_json = result.to_json();
        trace.push(ToolTrace {
            tool: name.to_string(),
            arguments,
            result: result_json.clone(),
            ok: result.ok,
        });
        result_json.to_string()
    }
}

fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
    let content = message.content.clone();
    Ok(match message.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(content)
                .build()?,
        ),
        Role::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()?,
        ),
        Role::Assistant => ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(content)
                .build()?,
        ),
    })
}
