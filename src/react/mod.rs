//! 认知层：Planner（调度策略与降级阶梯）、编排主循环、过程事件

pub mod events;
pub mod loop_;
pub mod planner;

pub use events::ReactEvent;
pub use loop_::{
    react_loop, ReactResult, ReactSession, UserInput, DEFAULT_FALLBACK_ANSWER,
    DEFAULT_MAX_TOOL_ROUNDS,
};
pub use planner::{Planner, PlannerOutcome, Route, DEFAULT_SYSTEM_PROMPT};
