//! Planner：决定这一步怎么问模型
//!
//! 1. 视觉分支：当前这一轮（从最近一条 human 到末尾）里，最近的图片（工具产出的 ImageReady 或用户附带的图片）
//!    交给视觉模型，回答包装成最终 ai 消息，不再回到工具循环。
//! 2. 否则绑定工具补全，失败时按 RecoveryEngine 的层级降级：精简历史 → 无工具 → 合成 `Error: ...`。
//!
//! respond 永不返回错误：任何情况下都给出一条 ai 消息。

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::core::{FallbackTier, RecoveryAction, RecoveryEngine};
use crate::llm::{LlmError, ModelGateway};
use crate::memory::{ImageSource, Message, PendingToolCall, Transcript};
use crate::tools::ToolSpec;

/// 内置系统提示词
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to several tools:

1. Calculator - for mathematical calculations
2. DuckDuckGo Search - for web searches
3. Database Tool - for fetching user information
4. Image URL Analysis - for analyzing images from URLs using vision AI
5. Local Image Analysis - for analyzing local image files by path
6. Image Description Analysis - for analyzing images based on text descriptions

When a user provides an image URL, use the analyze_image_url tool.
When they provide a file path to a local image, use analyze_local_image tool.
When they describe an image, use analyze_image_description.

Use tools when needed to provide accurate information. Always be helpful and explain your reasoning.";

/// 这一步模型回复走的路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// 完整历史 + 工具
    ToolBound,
    /// system + 最近 human + 工具
    ReducedHistory,
    /// 无工具普通补全
    Plain,
    /// 所有层级失败后合成的错误回答
    Synthesized,
    /// 视觉模型
    Vision,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolBound => "tool_bound",
            Self::ReducedHistory => "reduced_history",
            Self::Plain => "plain",
            Self::Synthesized => "synthesized",
            Self::Vision => "vision",
        }
    }
}

impl From<FallbackTier> for Route {
    fn from(tier: FallbackTier) -> Self {
        match tier {
            FallbackTier::Full => Self::ToolBound,
            FallbackTier::ReducedHistory => Self::ReducedHistory,
            FallbackTier::WithoutTools => Self::Plain,
        }
    }
}

/// Planner 输出：一条待追加的 ai 消息及其来源
#[derive(Debug, Clone)]
pub struct PlannerOutcome {
    pub message: Message,
    pub route: Route,
}

/// 视觉请求：图片、指令与描述
struct VisionRequest {
    image: ImageSource,
    instruction: String,
}

/// Planner：持有模型网关、系统提示词、工具描述与恢复引擎
pub struct Planner {
    gateway: Arc<dyn ModelGateway>,
    system_prompt: String,
    tool_specs: Vec<ToolSpec>,
    recovery: RecoveryEngine,
}

impl Planner {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        system_prompt: impl Into<String>,
        tool_specs: Vec<ToolSpec>,
    ) -> Self {
        Self {
            gateway,
            system_prompt: system_prompt.into(),
            tool_specs,
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tool_specs(&self) -> &[ToolSpec] {
        &self.tool_specs
    }

    pub fn model_id(&self) -> &str {
        self.gateway.model_id()
    }

    /// 获取模型累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.gateway.token_usage()
    }

    /// 根据当前对话记录产出下一条 ai 消息
    pub async fn respond(&self, transcript: &Transcript) -> PlannerOutcome {
        if let Some(request) = find_vision_request(transcript.current_exchange()) {
            return self.respond_vision(request).await;
        }
        self.respond_with_fallback(transcript).await
    }

    async fn respond_vision(&self, request: VisionRequest) -> PlannerOutcome {
        let context = request.image.describe();
        info!(route = Route::Vision.as_str(), image = %context, "vision analysis");
        let text = match self
            .gateway
            .complete_vision(&request.instruction, &request.image)
            .await
        {
            Ok(analysis) => format!("Image analysis for {context}:\n\n{analysis}"),
            Err(e) => {
                warn!(error = %e, "vision analysis failed");
                format!("Error analyzing image: {e}")
            }
        };
        PlannerOutcome {
            message: Message::ai(text),
            route: Route::Vision,
        }
    }

    async fn respond_with_fallback(&self, transcript: &Transcript) -> PlannerOutcome {
        let mut tier = FallbackTier::Full;
        loop {
            let result = self.attempt(tier, transcript).await;
            match result {
                Ok(message) => {
                    return PlannerOutcome {
                        message: normalize_tool_calls(message),
                        route: tier.into(),
                    }
                }
                Err(e) => match self.recovery.handle(tier, &e) {
                    RecoveryAction::RetryReducedHistory => tier = FallbackTier::ReducedHistory,
                    RecoveryAction::RetryWithoutTools => tier = FallbackTier::WithoutTools,
                    RecoveryAction::Synthesize(text) => {
                        return PlannerOutcome {
                            message: Message::ai(text),
                            route: Route::Synthesized,
                        }
                    }
                },
            }
        }
    }

    async fn attempt(&self, tier: FallbackTier, transcript: &Transcript) -> Result<Message, LlmError> {
        match tier {
            FallbackTier::Full => {
                self.gateway
                    .complete_with_tools(&transcript.snapshot(), &self.tool_specs)
                    .await
            }
            FallbackTier::ReducedHistory => {
                let mut reduced = Vec::with_capacity(2);
                if let Some(prompt) = transcript.system_prompt() {
                    reduced.push(Message::system(prompt));
                }
                reduced.extend(transcript.last_human().cloned());
                self.gateway
                    .complete_with_tools(&reduced, &self.tool_specs)
                    .await
            }
            FallbackTier::WithoutTools => {
                let last: Vec<Message> = transcript.last_human().cloned().into_iter().collect();
                self.gateway.complete_plain(&last).await.map(Message::ai)
            }
        }
    }
}

/// 从尾到头扫描本轮消息，找最近的图片
fn find_vision_request(exchange: &[Message]) -> Option<VisionRequest> {
    exchange.iter().rev().find_map(|message| match message {
        Message::ToolResult { output, .. } => output.as_image().map(|image| VisionRequest {
            instruction: image.analysis_instruction(),
            image: image.clone(),
        }),
        Message::Human { content, images } => images.last().map(|image| VisionRequest {
            instruction: if content.trim().is_empty() {
                image.analysis_instruction()
            } else {
                content.clone()
            },
            image: image.clone(),
        }),
        _ => None,
    })
}

/// 补齐空 call_id，丢弃同批次内重复的 call_id
fn normalize_tool_calls(message: Message) -> Message {
    let (content, tool_calls) = match message {
        Message::Ai {
            content,
            tool_calls,
        } if !tool_calls.is_empty() => (content, tool_calls),
        other => return other,
    };

    let mut seen = HashSet::new();
    let mut normalized: Vec<PendingToolCall> = Vec::with_capacity(tool_calls.len());
    for mut call in tool_calls {
        if call.call_id.trim().is_empty() {
            call.call_id = format!("call_{}", uuid::Uuid::new_v4().simple());
        }
        if seen.insert(call.call_id.clone()) {
            normalized.push(call);
        } else {
            warn!(call_id = %call.call_id, tool = %call.name, "dropping duplicate tool call id");
        }
    }
    Message::ai_with_tool_calls(content, normalized)
}
