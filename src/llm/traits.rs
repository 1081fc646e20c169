//! 模型网关抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 ModelGateway：绑定工具的补全、普通补全、视觉补全。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::{ImageSource, Message};
use crate::tools::ToolSpec;

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited (retry after {retry_after_ms} ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("model backend not configured: {0}")]
    NotConfigured(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::InvalidResponse(_) | Self::NotConfigured(_) => false,
        }
    }
}

/// 模型网关
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// 绑定工具的补全；返回 ai 消息（可能带待执行调用）
    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Message, LlmError>;

    /// 不绑定工具的普通补全
    async fn complete_plain(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 视觉补全：一段指令 + 一张图片
    async fn complete_vision(
        &self,
        instruction: &str,
        image: &ImageSource,
    ) -> Result<String, LlmError>;

    fn model_id(&self) -> &str;

    /// 累计 token 使用：(prompt, completion, total)；默认 (0, 0, 0)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
