//! Mock 网关（无需 API）
//!
//! - `MockGateway`：按关键词把最近一条用户消息映射为工具调用，拿到工具结果后直接拼出回答，便于本地跑通整条链路。
//! - `ScriptedGateway`：按脚本依次返回预设回复或错误，并记录每次请求，供测试断言。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::llm::{LlmError, ModelGateway};
use crate::memory::{ImageSource, Message, PendingToolCall, Role};
use crate::tools::calculator;
use crate::tools::ToolSpec;

fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

fn last_human_text(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role() == Role::Human)
        .map(|m| m.content().into_owned())
        .unwrap_or_default()
}

/// 关键词驱动的离线网关
pub struct MockGateway {
    calc: Regex,
    search: Regex,
    user: Regex,
    image_url: Regex,
    local_image: Regex,
}

impl MockGateway {
    pub fn new() -> Self {
        let compile = |p: &str| Regex::new(p).expect("mock intent regex must compile");
        Self {
            calc: compile(r"(?i)(?:calculate|compute|what is|what's|evaluate)\s+(.+)"),
            search: compile(r"(?i)(?:search(?:\s+for)?|look\s+up|find information about)\s+(.+)"),
            user: compile(r"(?i)\b(user\d+)\b"),
            image_url: compile(r"(?i)https?://\S+"),
            local_image: compile(r"(?i)([\w./\\-]+\.(?:png|jpe?g|gif|webp|bmp))\b"),
        }
    }

    /// 根据用户文本选出一个工具调用
    fn plan(&self, text: &str, tools: &[ToolSpec]) -> Option<(String, Value)> {
        let available = |name: &str| tools.iter().any(|t| t.name == name);

        if available("analyze_image_url") {
            if let Some(m) = self.image_url.find(text) {
                let url = m.as_str().trim_end_matches(|c: char| ",.;)\"'".contains(c));
                return Some(("analyze_image_url".into(), json!({ "image_url": url })));
            }
        }
        if available("analyze_local_image") {
            if let Some(c) = self.local_image.captures(text) {
                return Some(("analyze_local_image".into(), json!({ "file_path": &c[1] })));
            }
        }
        if available("fetch_user_from_database") {
            if let Some(c) = self.user.captures(text) {
                return Some((
                    "fetch_user_from_database".into(),
                    json!({ "user_id": c[1].to_lowercase() }),
                ));
            }
        }
        if available("duckduckgo_search") {
            if let Some(c) = self.search.captures(text) {
                let query = c[1].trim().trim_end_matches('?');
                return Some(("duckduckgo_search".into(), json!({ "query": query })));
            }
        }
        if available("calculator") {
            if let Some(c) = self.calc.captures(text) {
                let expr = c[1].trim().trim_end_matches(['?', '.', '!']);
                if calculator::evaluate(expr).is_ok() {
                    return Some(("calculator".into(), json!({ "expression": expr })));
                }
            }
        }
        None
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelGateway for MockGateway {
    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Message, LlmError> {
        let start = messages
            .iter()
            .rposition(|m| m.role() == Role::Human)
            .unwrap_or(0);
        let observations: Vec<String> = messages[start..]
            .iter()
            .filter(|m| m.role() == Role::ToolResult)
            .map(|m| m.content().into_owned())
            .collect();
        if !observations.is_empty() {
            return Ok(Message::ai(format!(
                "Here is what I found:\n\n{}",
                observations.join("\n\n")
            )));
        }

        let text = last_human_text(messages);
        match self.plan(&text, tools) {
            Some((name, arguments)) => Ok(Message::ai_with_tool_calls(
                "",
                vec![PendingToolCall::new(new_call_id(), name, arguments)],
            )),
            None => Ok(Message::ai(format!("(mock) You said: {}", text.trim()))),
        }
    }

    async fn complete_plain(&self, messages: &[Message]) -> Result<String, LlmError> {
        Ok(format!("(mock) You said: {}", last_human_text(messages).trim()))
    }

    async fn complete_vision(
        &self,
        instruction: &str,
        image: &ImageSource,
    ) -> Result<String, LlmError> {
        Ok(format!(
            "(mock vision) {} [{}]",
            image.describe(),
            instruction.chars().take(40).collect::<String>()
        ))
    }

    fn model_id(&self) -> &str {
        "mock"
    }
}

/// ScriptedGateway 记录的一次请求
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayRequest {
    WithTools {
        messages: Vec<Message>,
        tools: Vec<String>,
    },
    Plain {
        messages: Vec<Message>,
    },
    Vision {
        instruction: String,
        image: ImageSource,
    },
}

/// 脚本网关：三种模式各自一条回复队列；队列耗尽时返回 NotConfigured 错误
#[derive(Default)]
pub struct ScriptedGateway {
    with_tools: Mutex<VecDeque<Result<Message, LlmError>>>,
    plain: Mutex<VecDeque<Result<String, LlmError>>>,
    vision: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<GatewayRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定工具模式的下一条回复
    pub fn reply(self, message: Message) -> Self {
        push(&self.with_tools, Ok(message));
        self
    }

    /// 下一条回复为一个工具调用
    pub fn call_tool(self, id: &str, name: &str, arguments: Value) -> Self {
        self.reply(Message::ai_with_tool_calls(
            "",
            vec![PendingToolCall::new(id, name, arguments)],
        ))
    }

    pub fn fail(self, err: LlmError) -> Self {
        push(&self.with_tools, Err(err));
        self
    }

    pub fn plain_reply(self, text: &str) -> Self {
        push(&self.plain, Ok(text.to_string()));
        self
    }

    pub fn plain_fail(self, err: LlmError) -> Self {
        push(&self.plain, Err(err));
        self
    }

    pub fn vision_reply(self, text: &str) -> Self {
        push(&self.vision, Ok(text.to_string()));
        self
    }

    pub fn vision_fail(self, err: LlmError) -> Self {
        push(&self.vision, Err(err));
        self
    }

    /// 已收到的请求（按时间顺序）
    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn record(&self, request: GatewayRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
    }
}

fn push<T>(queue: &Mutex<VecDeque<T>>, item: T) {
    if let Ok(mut q) = queue.lock() {
        q.push_back(item);
    }
}

fn pop<T>(queue: &Mutex<VecDeque<Result<T, LlmError>>>, mode: &str) -> Result<T, LlmError> {
    queue
        .lock()
        .ok()
        .and_then(|mut q| q.pop_front())
        .unwrap_or_else(|| Err(LlmError::NotConfigured(format!("{mode} script exhausted"))))
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Message, LlmError> {
        self.record(GatewayRequest::WithTools {
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        pop(&self.with_tools, "tool-bound")
    }

    async fn complete_plain(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.record(GatewayRequest::Plain {
            messages: messages.to_vec(),
        });
        pop(&self.plain, "plain")
    }

    async fn complete_vision(
        &self,
        instruction: &str,
        image: &ImageSource,
    ) -> Result<String, LlmError> {
        self.record(GatewayRequest::Vision {
            instruction: instruction.to_string(),
            image: image.clone(),
        });
        pop(&self.vision, "vision")
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}
