//! HTTP 处理函数

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::Utc;
use futures_util::stream::{self, Stream};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::agent::{process_message, process_message_stream, Capability};
use crate::core::AgentError;
use crate::react::UserInput;
use crate::tools::image::{encode_for_vision, SUPPORTED_EXTENSIONS};
use crate::web::types::{
    AgentInfoResponse, ChatRequest, ChatResponse, ErrorResponse, HealthResponse, ImageData,
    SessionResetRequest, SessionResetResponse,
};
use crate::web::AppState;

/// 统一的错误响应：`{error, status: "error", timestamp}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error processing request: {e}"),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse::new(self.message))).into_response()
    }
}

fn user_input(req: ChatRequest) -> Result<(Option<String>, UserInput), ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "message must not be empty",
        ));
    }
    let images = req
        .images
        .unwrap_or_default()
        .into_iter()
        .map(ImageData::into_source)
        .collect();
    Ok((
        req.session_id,
        UserInput::new(req.message).with_images(images),
    ))
}

fn preview(message: &str) -> String {
    message.chars().take(100).collect()
}

/// GET /
pub async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "message": format!("Welcome to {} API", state.components.config.app.name),
        "docs": "/agent/capabilities",
        "health": "/health",
        "agent_info": "/agent/info",
    }))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /agent/info
pub async fn agent_info(State(state): State<Arc<AppState>>) -> Json<AgentInfoResponse> {
    let components = &state.components;
    Json(AgentInfoResponse {
        name: components.config.app.name.clone(),
        description: "AI assistant with multiple capabilities".to_string(),
        model: components.gateway.model_id().to_string(),
        capabilities: components.capabilities(),
        status: "active",
    })
}

/// GET /agent/capabilities
pub async fn agent_capabilities(State(state): State<Arc<AppState>>) -> Json<Vec<Capability>> {
    Json(state.components.capabilities())
}

/// GET /agent/status
pub async fn agent_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let (prompt, completion, total) = state.components.planner.token_usage();
    Json(json!({
        "initialized": true,
        "status": "ready",
        "active_sessions": state.components.sessions.len().await,
        "token_usage": {
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": total,
        },
    }))
}

/// POST /chat：跑完一轮后返回完整回答
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let (session_id, input) = user_input(req)?;
    info!(
        session_id = session_id.as_deref().unwrap_or("-"),
        message = %preview(&input.text),
        "chat request"
    );
    let (response, session_id) =
        process_message(&state.components, session_id.as_deref(), input).await?;
    info!(session_id = %session_id, "chat response generated");
    Ok(Json(ChatResponse {
        response,
        session_id,
        timestamp: Utc::now(),
        status: "success".to_string(),
    }))
}

/// POST /chat/stream：SSE，每个事件一帧 `data: {json}`
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (session_id, input) = user_input(req)?;
    let (session_id, rx) = process_message_stream(
        &state.components,
        session_id.as_deref(),
        input,
        state.stream.clone(),
    )
    .await;
    info!(session_id = %session_id, "stream started");

    // 序列化失败时补一帧 error 并结束；丢弃 rx 会让编排随之取消
    let events = stream::unfold((rx, false), |(mut rx, ended)| async move {
        if ended {
            return None;
        }
        let ev = rx.recv().await?;
        let (data, ended) = match encode_frame(&ev, &ev.session_id) {
            Ok(json) => (json, false),
            Err(fallback) => (fallback, true),
        };
        Some((Ok(Event::default().data(data)), (rx, ended)))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// 事件编码为 SSE data；失败时 Err 携带手工拼出的 error 事件
fn encode_frame<T: Serialize>(ev: &T, session_id: &str) -> Result<String, String> {
    serde_json::to_string(ev).map_err(|e| {
        warn!(session_id = %session_id, error = %e, "failed to serialize stream event");
        json!({
            "event": "error",
            "data": format!("Stream serialization error: {e}"),
            "session_id": session_id,
            "timestamp": Utc::now(),
        })
        .to_string()
    })
}

/// POST /upload-image：multipart 字段 `file`，返回可直接放进 images 的图片描述
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ImageData>, ApiError> {
    let image_cfg = &state.components.config.tools.image;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("uploaded_image").to_string();
        let ext = Path::new(&filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let is_image_type = field
            .content_type()
            .map(|ct| ct.starts_with("image/"))
            .unwrap_or(false);
        if !is_image_type && !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(ApiError::bad_request("File must be an image"));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read upload: {e}")))?;
        if bytes.len() as u64 > image_cfg.max_bytes {
            return Err(ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!(
                    "Image too large: {} bytes (max {} bytes)",
                    bytes.len(),
                    image_cfg.max_bytes
                ),
            ));
        }

        let max_dimension = image_cfg.max_dimension;
        let name = filename.clone();
        let source = tokio::task::spawn_blocking(move || {
            encode_for_vision(&bytes, &name, max_dimension)
        })
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| ApiError::bad_request(format!("Error processing image: {e}")))?;
        info!(filename = %filename, "image uploaded");
        return Ok(Json(ImageData::from(source)));
    }
    Err(ApiError::bad_request("missing multipart field 'file'"))
}

/// POST /session/reset：丢弃会话记录
pub async fn session_reset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionResetRequest>,
) -> Result<Json<SessionResetResponse>, ApiError> {
    let session_id = req.session_id.trim().to_string();
    if session_id.is_empty() {
        return Err(ApiError::bad_request("session_id is required"));
    }
    let reset = state.components.reset_session(&session_id).await;
    Ok(Json(SessionResetResponse {
        session_id,
        reset,
        status: "success",
    }))
}
