//! 图片工具：URL 图片、本地图片、文字描述
//!
//! 前两个工具只负责准备图片（返回 `ToolOutput::ImageReady`），真正的分析由规划器切到视觉模型完成。
//! 本地图片会被缩放到 max_dimension 以内并重新编码为 PNG 或 JPEG（质量 85），再转 base64。

use std::io::Cursor;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::memory::{ImageSource, ToolOutput};
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::Tool;

/// 支持的扩展名（小写，不含点）
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

const JPEG_QUALITY: u8 = 85;

/// analyze_image_url 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ImageUrlArgs {
    /// The http(s) URL of the image to analyze
    pub image_url: String,
}

pub struct AnalyzeImageUrlTool;

#[async_trait]
impl Tool for AnalyzeImageUrlTool {
    fn name(&self) -> &str {
        "analyze_image_url"
    }

    fn description(&self) -> &str {
        "Prepare an image from an http(s) URL for vision analysis. Use this when the user provides an image URL."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ImageUrlArgs>()
    }

    fn examples(&self) -> Vec<String> {
        vec!["analyze this image https://example.com/image.jpg".to_string()]
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
        let args: ImageUrlArgs = parse_args(args)?;
        let url = args.image_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Ok(ToolOutput::text(format!(
                "Invalid URL: {url}. Please provide a valid HTTP/HTTPS URL."
            )));
        }
        Ok(ToolOutput::ImageReady(ImageSource::url(url)))
    }
}

/// analyze_local_image 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct LocalImageArgs {
    /// Path to the local image file (absolute, or relative to the workspace / current directory)
    pub file_path: String,
}

pub struct AnalyzeLocalImageTool {
    workspace_root: Option<PathBuf>,
    max_bytes: u64,
    max_dimension: u32,
}

impl AnalyzeLocalImageTool {
    pub fn new(workspace_root: Option<PathBuf>, max_bytes: u64, max_dimension: u32) -> Self {
        Self {
            workspace_root,
            max_bytes,
            max_dimension: max_dimension.max(1),
        }
    }

    /// 依次尝试：原路径（绝对或相对当前目录）、workspace_root 下的相对路径
    fn resolve(&self, file_path: &str) -> Option<PathBuf> {
        let path = PathBuf::from(file_path);
        if path.exists() {
            return Some(path);
        }
        if path.is_absolute() {
            return None;
        }
        self.workspace_root
            .as_ref()
            .map(|root| root.join(&path))
            .filter(|p| p.exists())
    }

    fn prepare(&self, file_path: &str) -> Result<ImageSource, String> {
        let path = self
            .resolve(file_path)
            .ok_or_else(|| format!("Image file not found: {file_path}. Please check the path."))?;
        if !path.is_file() {
            return Err(format!("Path is not a file: {file_path}"));
        }
        let ext = extension_of(&path);
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            let supported: Vec<String> =
                SUPPORTED_EXTENSIONS.iter().map(|e| format!(".{e}")).collect();
            return Err(format!(
                "Unsupported image format: .{ext}. Supported formats: {}",
                supported.join(", ")
            ));
        }
        let size = std::fs::metadata(&path)
            .map_err(|e| format!("Error preparing local image '{file_path}': {e}"))?
            .len();
        if size > self.max_bytes {
            return Err(format!(
                "Image file too large: {size} bytes (max {} bytes)",
                self.max_bytes
            ));
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| format!("Error preparing local image '{file_path}': {e}"))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        encode_for_vision(&bytes, &filename, self.max_dimension)
            .map_err(|e| format!("Error preparing local image '{file_path}': {e}"))
    }
}

#[async_trait]
impl Tool for AnalyzeLocalImageTool {
    fn name(&self) -> &str {
        "analyze_local_image"
    }

    fn description(&self) -> &str {
        "Prepare a local image file (jpg, jpeg, png, gif, webp, bmp) for vision analysis. \
         Use this when the user provides a file path to an image."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<LocalImageArgs>()
    }

    fn examples(&self) -> Vec<String> {
        vec!["analyze image test_images/sample.png".to_string()]
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
        let args: LocalImageArgs = parse_args(args)?;
        let tool = Self {
            workspace_root: self.workspace_root.clone(),
            max_bytes: self.max_bytes,
            max_dimension: self.max_dimension,
        };
        // 解码与缩放是 CPU 密集操作
        let prepared = tokio::task::spawn_blocking(move || tool.prepare(&args.file_path))
            .await
            .map_err(|e| format!("image task failed: {e}"))?;
        Ok(match prepared {
            Ok(image) => ToolOutput::ImageReady(image),
            Err(text) => ToolOutput::text(text),
        })
    }
}

/// analyze_image_description 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ImageDescriptionArgs {
    /// Description of the image to analyze
    pub image_description: String,
}

pub struct AnalyzeImageDescriptionTool;

#[async_trait]
impl Tool for AnalyzeImageDescriptionTool {
    fn name(&self) -> &str {
        "analyze_image_description"
    }

    fn description(&self) -> &str {
        "Analyze an image based only on a text description, when no actual image is available."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ImageDescriptionArgs>()
    }

    fn examples(&self) -> Vec<String> {
        vec!["analyze this image of a sunset over mountains".to_string()]
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
        let args: ImageDescriptionArgs = parse_args(args)?;
        let d = args.image_description;
        Ok(ToolOutput::text(format!(
            "Based on the description '{d}': This appears to be a {}. Without seeing the actual image, \
             I can provide general insights about this type of visual content and suggest what elements \
             might typically be present.",
            d.to_lowercase()
        )))
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// 解码图片字节，缩放到 max_dimension 以内，去掉 alpha 后重新编码并转 base64
///
/// png / gif / webp 输出 PNG，其余输出 JPEG（质量 85）。
pub fn encode_for_vision(
    bytes: &[u8],
    filename: &str,
    max_dimension: u32,
) -> Result<ImageSource, String> {
    let decoded = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
    let resized = if decoded.width() > max_dimension || decoded.height() > max_dimension {
        decoded.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    } else {
        decoded
    };
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let ext = extension_of(Path::new(filename));
    let as_png = matches!(ext.as_str(), "png" | "gif" | "webp");
    let mut buf = Vec::new();
    let mime_type = if as_png {
        rgb.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| e.to_string())?;
        "image/png"
    } else {
        let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
        rgb.write_with_encoder(encoder).map_err(|e| e.to_string())?;
        "image/jpeg"
    };

    let data = base64::engine::general_purpose::STANDARD.encode(&buf);
    Ok(ImageSource::inline(mime_type, data, filename))
}
