//! 错误恢复引擎
//!
//! 模型调用失败时按层级降级：完整历史 → 精简历史 → 无工具 → 合成回答。
//! 每一层只尝试一次，最终一定得到一条 ai 消息。

use tracing::warn;

use crate::core::RecoveryAction;
use crate::llm::LlmError;

/// 当前所处的降级层级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTier {
    /// 完整历史 + 工具
    Full,
    /// system + 最近 human + 工具
    ReducedHistory,
    /// 最近 human，无工具
    WithoutTools,
}

impl FallbackTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::ReducedHistory => "reduced_history",
            Self::WithoutTools => "without_tools",
        }
    }
}

/// 将模型错误映射为下一步动作
#[derive(Debug, Default, Clone)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 根据失败所在层级返回下一层动作；最后一层失败则合成 `Error: {error}`
    pub fn handle(&self, tier: FallbackTier, err: &LlmError) -> RecoveryAction {
        warn!(tier = tier.as_str(), error = %err, "model call failed, falling back");
        match tier {
            FallbackTier::Full => RecoveryAction::RetryReducedHistory,
            FallbackTier::ReducedHistory => RecoveryAction::RetryWithoutTools,
            FallbackTier::WithoutTools => RecoveryAction::Synthesize(format!("Error: {err}")),
        }
    }
}
