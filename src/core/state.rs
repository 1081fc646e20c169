//! 编排阶段
//!
//! DECIDE（初始）→ DISPATCH_TOOLS → DECIDE … → DONE（终态）。

use serde::Serialize;

/// 编排循环所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Decide,
    DispatchTools,
    Done,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decide => "DECIDE",
            Self::DispatchTools => "DISPATCH_TOOLS",
            Self::Done => "DONE",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
