//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FORAGER__*` 覆盖（双下划线表示嵌套，如 `FORAGER__LLM__PROVIDER=mock`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub server: ServerSection,
}

/// [app] 段：应用名、工具轮数上限、兜底回答、系统提示词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 一轮对话内最多执行几次工具阶段
    pub max_tool_rounds: usize,
    /// 没有可用回答时返回的固定文本
    pub fallback_answer: String,
    /// 自定义系统提示词文件；未设置或读取失败时用内置提示词
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "forager".to_string(),
            max_tool_rounds: 8,
            fallback_answer: "I couldn't generate a response.".to_string(),
            system_prompt_path: None,
        }
    }
}

/// [llm] 段：后端选择、模型名与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / mock；openai 无 API Key 时退回 mock
    pub provider: String,
    pub model: String,
    /// 视觉模型，未设置时与 model 相同
    pub vision_model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            vision_model: None,
            base_url: None,
            temperature: 0.0,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

impl LlmSection {
    pub fn vision_model(&self) -> &str {
        self.vision_model.as_deref().unwrap_or(&self.model)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [tools] 段：超时、并发、本地文件根目录、搜索与图片参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 全局同时执行的工具调用上限
    pub max_concurrent: usize,
    /// 本地图片相对路径的查找根目录
    pub workspace_root: Option<PathBuf>,
    pub search: SearchSection,
    pub image: ImageSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            max_concurrent: 4,
            workspace_root: None,
            search: SearchSection::default(),
            image: ImageSection::default(),
        }
    }
}

/// [tools.search] 段：DuckDuckGo 即时回答接口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_results: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: "https://api.duckduckgo.com/".to_string(),
            timeout_secs: 15,
            max_results: 3,
        }
    }
}

/// [tools.image] 段：本地图片大小与缩放上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageSection {
    pub max_bytes: u64,
    pub max_dimension: u32,
}

impl Default for ImageSection {
    fn default() -> Self {
        Self {
            max_bytes: 20 * 1024 * 1024,
            max_dimension: 1024,
        }
    }
}

/// [server] 段：监听地址、会话空闲驱逐、流式参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub session_idle_secs: u64,
    pub janitor_interval_secs: u64,
    pub stream: StreamSection,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            session_idle_secs: 1800,
            janitor_interval_secs: 60,
            stream: StreamSection::default(),
        }
    }
}

/// [server.stream] 段：通道容量与事件节奏
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    /// 有界通道容量
    pub buffer: usize,
    /// 每个 token 事件之后的间隔（毫秒）
    pub token_delay_ms: u64,
    /// 其余事件之后的间隔（毫秒）
    pub event_delay_ms: u64,
    /// 消费者迟迟不取事件时放弃（秒）
    pub consumer_timeout_secs: u64,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            buffer: 64,
            token_delay_ms: 30,
            event_delay_ms: 100,
            consumer_timeout_secs: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 FORAGER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FORAGER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FORAGER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
