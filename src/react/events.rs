//! 编排过程事件：阶段切换、模型回复、工具调用、观察与最终回答
//!
//! 由 react_loop 发出，流式多路器据此生成对外事件；也可直接序列化为 JSON 供调试展示。

use serde::Serialize;

use crate::core::Phase;
use crate::react::Route;

/// 单步过程事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 进入某个阶段（每次进入都发，含重复进入 DECIDE）
    PhaseEntered { phase: Phase },
    /// 模型给出回复：走了哪条路径、带几个待执行调用
    ModelResponded { route: Route, pending_calls: usize },
    /// 即将执行的工具调用
    ToolCall {
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        call_id: String,
        tool: String,
        preview: String,
    },
    /// 本轮最终回答
    Answer { text: String },
}
