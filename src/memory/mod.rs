//! 记忆层：单会话对话记录（只追加，不跨进程持久化）

pub mod transcript;

pub use transcript::{
    ImageSource, Message, PendingToolCall, Role, ToolOutput, Transcript, TranscriptError,
    IMAGE_URL_SENTINEL, LOCAL_IMAGE_SENTINEL,
};
