//! OpenAI 兼容 API 网关
//!
//! 直接用 reqwest 调用 `{base_url}/chat/completions`；支持工具绑定（function calling）与图片输入（image_url 内容块）。
//! 可配置 base_url，兼容 OpenAI、自建代理等。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::{LlmError, ModelGateway};
use crate::memory::{ImageSource, Message, PendingToolCall};
use crate::tools::ToolSpec;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容网关：持有 HTTP Client、API Key 与模型名
pub struct OpenAiGateway {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    vision_model: String,
    temperature: f32,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiGateway {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        vision_model: &str,
        api_key: &str,
        temperature: f32,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::NotConfigured("missing API key".to_string()));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LlmError::NotConfigured(format!("http client: {e}")))?;
        let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            endpoint: format!("{base}/chat/completions"),
            model: model.to_string(),
            vision_model: vision_model.to_string(),
            temperature,
            usage: TokenUsage::new(),
        })
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<ResponseMessage, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Network(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::Network(format!("connection failed: {e}"))
                } else {
                    LlmError::Network(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Network(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimited {
                    retry_after_ms: retry_after_ms.unwrap_or(1000),
                });
            }
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::InvalidResponse(format!("{e}")))?;
        if let Some(usage) = &parsed.usage {
            self.usage
                .add(u64::from(usage.prompt_tokens), u64::from(usage.completion_tokens));
        }
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Message, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: to_wire_messages(messages),
            tools: to_wire_tools(tools),
            temperature: self.temperature,
        };
        let reply = self.send(&request).await?;
        Ok(from_wire_reply(reply))
    }

    async fn complete_plain(&self, messages: &[Message]) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: to_wire_messages(messages),
            tools: None,
            temperature: self.temperature,
        };
        let reply = self.send(&request).await?;
        Ok(reply.content.unwrap_or_default())
    }

    async fn complete_vision(
        &self,
        instruction: &str,
        image: &ImageSource,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.vision_model,
            messages: vec![WireMessage::user_parts(instruction, std::slice::from_ref(image))],
            tools: None,
            temperature: self.temperature,
        };
        let reply = self.send(&request).await?;
        Ok(reply.content.unwrap_or_default())
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|m| match m {
            Message::System { content } => WireMessage::text("system", content),
            Message::Human { content, images } if images.is_empty() => {
                WireMessage::text("user", content)
            }
            Message::Human { content, images } => WireMessage::user_parts(content, images),
            Message::Ai {
                content,
                tool_calls,
            } => WireMessage {
                role: "assistant",
                content: (!content.is_empty() || tool_calls.is_empty())
                    .then(|| WireContent::Text(content.clone())),
                tool_calls: (!tool_calls.is_empty())
                    .then(|| tool_calls.iter().map(WireToolCall::from_pending).collect()),
                tool_call_id: None,
            },
            Message::ToolResult {
                tool_call_id,
                output,
                ..
            } => WireMessage {
                role: "tool",
                content: Some(WireContent::Text(output.model_text().into_owned())),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
            },
        })
        .collect()
}

fn to_wire_tools(tools: &[ToolSpec]) -> Option<Vec<WireTool>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| WireTool {
                r#type: "function",
                function: WireFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect(),
    )
}

fn from_wire_reply(reply: ResponseMessage) -> Message {
    let tool_calls = reply
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter(|tc| !tc.function.name.is_empty())
        .map(|tc| {
            let arguments = serde_json::from_str(&tc.function.arguments).unwrap_or_else(|e| {
                debug!(tool = %tc.function.name, error = %e, "unparseable tool arguments");
                serde_json::json!({})
            });
            PendingToolCall::new(tc.id, tc.function.name, arguments)
        })
        .collect();
    Message::ai_with_tool_calls(reply.content.unwrap_or_default(), tool_calls)
}

// OpenAI wire types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: Some(WireContent::Text(content.to_string())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn user_parts(text: &str, images: &[ImageSource]) -> Self {
        let mut parts = vec![WirePart::Text {
            text: text.to_string(),
        }];
        parts.extend(images.iter().map(|image| WirePart::ImageUrl {
            image_url: WireImageUrl {
                url: image.data_url(),
            },
        }));
        Self {
            role: "user",
            content: Some(WireContent::Parts(parts)),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Debug, Serialize)]
struct WireImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

impl WireToolCall {
    fn from_pending(call: &PendingToolCall) -> Self {
        Self {
            id: call.call_id.clone(),
            r#type: function_type(),
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: serde_json::to_string(&call.arguments)
                    .unwrap_or_else(|_| "{}".to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
