//! Forager HTTP API
//!
//! 启动: cargo run --bin forager-web
//! 默认监听 http://0.0.0.0:8000（[server] host / port 或 FORAGER__SERVER__PORT 覆盖）

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use forager::agent::create_agent_components;
use forager::config::load_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forager::observability::init();

    // 可选：第一个参数为额外配置文件
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let components =
        Arc::new(create_agent_components(&cfg).context("Failed to initialize agent")?);
    let janitor = components.start_janitor();
    tracing::info!(tools = ?components.tool_names(), "agent initialized");

    let served = forager::web::serve(Arc::clone(&components)).await;

    components.shutdown.cancel();
    let _ = janitor.await;
    served.context("HTTP server failed")?;
    Ok(())
}
