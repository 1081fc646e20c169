//! HTTP 接口（axum）
//!
//! GET  /、/health、/agent/info、/agent/capabilities、/agent/status
//! POST /chat、/chat/stream（SSE）、/upload-image（multipart）、/session/reset

pub mod handlers;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::agent::AgentComponents;
use crate::stream::StreamConfig;

pub use handlers::ApiError;

/// 路由共享状态
pub struct AppState {
    pub components: Arc<AgentComponents>,
    pub stream: StreamConfig,
}

/// 使用配置里的流参数构建路由
pub fn router(components: Arc<AgentComponents>) -> Router {
    let stream = StreamConfig::from(&components.config.server.stream);
    router_with_stream(components, stream)
}

pub fn router_with_stream(components: Arc<AgentComponents>, stream: StreamConfig) -> Router {
    // multipart 额外留 1 MiB 给表单边界与其它字段
    let body_limit = usize::try_from(components.config.tools.image.max_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(1024 * 1024);
    let state = Arc::new(AppState { components, stream });

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/agent/info", get(handlers::agent_info))
        .route("/agent/capabilities", get(handlers::agent_capabilities))
        .route("/agent/status", get(handlers::agent_status))
        .route("/chat", post(handlers::chat))
        .route("/chat/stream", post(handlers::chat_stream))
        .route("/upload-image", post(handlers::upload_image))
        .route("/session/reset", post(handlers::session_reset))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 绑定地址并运行服务，直到进程退出
pub async fn serve(components: Arc<AgentComponents>) -> std::io::Result<()> {
    let server = &components.config.server;
    let addr: SocketAddr = format!("{}:{}", server.host, server.port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let app = router(Arc::clone(&components));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("{} API: http://{}", components.config.app.name, addr);
    axum::serve(listener, app).await
}
