//! 流式多路器：把编排过程事件转成有序的对外事件流
//!
//! connected → (tool_start → tool_end)* → token* → done | error

pub mod event;
pub mod multiplexer;

pub use event::{StreamEvent, StreamEventKind};
pub use multiplexer::{spawn_stream, tokenize, PhaseTracker, StreamConfig};
