//! Forager - Rust 工具型对话智能体
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时（供 CLI / HTTP 调用）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、阶段、会话注册表、工具调度
//! - **llm**: 模型网关抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话记录（Transcript）与消息模型
//! - **observability**: tracing 初始化
//! - **react**: Planner、编排主循环、过程事件
//! - **stream**: 流式多路器与对外事件
//! - **tools**: 工具注册表、执行器与内置工具（计算、搜索、查库、看图）
//! - **web**: axum HTTP 接口（feature `web`）

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod stream;
pub mod tools;
#[cfg(feature = "web")]
pub mod web;
