//! 模型层：网关抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{MockGateway, ScriptedGateway};
pub use openai::{OpenAiGateway, TokenUsage};
pub use traits::{LlmError, ModelGateway};
