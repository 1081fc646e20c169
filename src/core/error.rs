//! Agent 错误类型与恢复动作
//!
//! 工具错误不会出现在这里（执行器已转为文本结果）；模型错误走 RecoveryEngine 的降级阶梯，
//! 只有 Transcript 不变量被破坏、取消、任务崩溃和配置问题会终止本轮。

use thiserror::Error;

use crate::memory::TranscriptError;

/// 终止当前轮次的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(#[from] TranscriptError),

    #[error("Cancelled")]
    Cancelled,

    /// 编排任务 panic 或被中止
    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 模型调用失败后，恢复引擎给出的下一步
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 只保留 system + 最近一条 human，仍绑定工具重试
    RetryReducedHistory,
    /// 不绑定工具，只用最近一条 human 文本做普通补全
    RetryWithoutTools,
    /// 放弃调用模型，直接合成最终回答
    Synthesize(String),
}
