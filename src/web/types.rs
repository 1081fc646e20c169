//! HTTP 请求 / 响应结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::Capability;
use crate::memory::ImageSource;

/// 请求里携带的图片
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageData {
    /// base64 数据（可带 data: 前缀）或图片 URL
    pub data: String,
    #[serde(rename = "type")]
    pub kind: ImageDataKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageDataKind {
    Base64,
    Url,
}

impl ImageData {
    pub fn into_source(self) -> ImageSource {
        match self.kind {
            ImageDataKind::Url => ImageSource::url(self.data),
            ImageDataKind::Base64 => {
                let filename = self.filename.unwrap_or_else(|| "uploaded_image".to_string());
                // data:<mime>;base64,<payload>
                let parsed = self
                    .data
                    .strip_prefix("data:")
                    .and_then(|rest| rest.split_once(";base64,"))
                    .map(|(mime, payload)| (mime.to_string(), payload.to_string()));
                let (mime, payload) = match parsed {
                    Some(parts) => parts,
                    None => (
                        self.mime_type.unwrap_or_else(|| "image/jpeg".to_string()),
                        self.data,
                    ),
                };
                ImageSource::inline(mime, payload, filename)
            }
        }
    }
}

impl From<ImageSource> for ImageData {
    fn from(source: ImageSource) -> Self {
        match source {
            ImageSource::Url { url } => Self {
                data: url,
                kind: ImageDataKind::Url,
                filename: None,
                mime_type: None,
            },
            ImageSource::Inline {
                mime_type,
                data,
                filename,
            } => Self {
                data,
                kind: ImageDataKind::Base64,
                filename: Some(filename),
                mime_type: Some(mime_type),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<ImageData>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status: "error".to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentInfoResponse {
    pub name: String,
    pub description: String,
    pub model: String,
    pub capabilities: Vec<Capability>,
    pub status: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionResetRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResetResponse {
    pub session_id: String,
    /// 会话此前是否存在
    pub reset: bool,
    pub status: &'static str,
}
