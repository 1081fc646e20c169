//! 对外流式事件：`{event, data, session_id, timestamp}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    Connected,
    ToolStart,
    ToolEnd,
    Token,
    Error,
    Done,
}

impl StreamEventKind {
    /// done / error 为终止事件，每条流恰好一个
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::ToolStart => "tool_start",
            Self::ToolEnd => "tool_end",
            Self::Token => "token",
            Self::Error => "error",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for StreamEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event: StreamEventKind,
    pub data: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    pub fn new(event: StreamEventKind, data: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            event,
            data: data.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.event.is_terminal()
    }
}
