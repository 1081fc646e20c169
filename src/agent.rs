//! Headless Agent 运行时
//!
//! 供 CLI 与 HTTP 前端调用的无界面 Agent 逻辑：
//! create_agent_components 构建模型网关 / 工具注册表 / 执行器 / Planner / 会话注册表，
//! process_message 对单条用户输入跑一轮编排并返回最终回复，
//! process_message_stream 返回有序的对外事件流。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::core::{AgentError, SessionRegistry, TaskScheduler};
use crate::llm::{MockGateway, ModelGateway, OpenAiGateway};
use crate::react::{react_loop, Planner, ReactEvent, ReactSession, UserInput, DEFAULT_SYSTEM_PROMPT};
use crate::stream::{spawn_stream, StreamConfig, StreamEvent};
use crate::tools::{
    AnalyzeImageDescriptionTool, AnalyzeImageUrlTool, AnalyzeLocalImageTool, CalculatorTool,
    SearchTool, ToolDescriptor, ToolExecutor, ToolRegistry, UserDatabaseTool,
};

/// 预构建的 Agent 组件，多会话共享
pub struct AgentComponents {
    pub config: AppConfig,
    pub gateway: Arc<dyn ModelGateway>,
    pub planner: Arc<Planner>,
    pub executor: Arc<ToolExecutor>,
    pub sessions: Arc<SessionRegistry>,
    /// 关闭后台任务（会话清理）
    pub shutdown: CancellationToken,
}

/// 单个工具的能力描述（/agent/capabilities 与 CLI 横幅）
#[derive(Debug, Clone, Serialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub examples: Vec<String>,
}

impl From<ToolDescriptor> for Capability {
    fn from(d: ToolDescriptor) -> Self {
        Self {
            name: d.name,
            description: d.description,
            examples: d.examples,
        }
    }
}

/// 按配置选择模型后端：provider=openai 且有 OPENAI_API_KEY 时走 OpenAI 兼容接口，否则用 Mock
pub fn create_gateway(cfg: &AppConfig) -> Result<Arc<dyn ModelGateway>, AgentError> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        info!("using mock model gateway");
        return Ok(Arc::new(MockGateway::new()));
    }
    if provider != "openai" {
        return Err(AgentError::ConfigError(format!(
            "unknown llm provider '{}'",
            cfg.llm.provider
        )));
    }

    let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    if api_key.trim().is_empty() {
        warn!("OPENAI_API_KEY not set, falling back to mock model gateway");
        return Ok(Arc::new(MockGateway::new()));
    }
    let gateway = OpenAiGateway::new(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.model,
        cfg.llm.vision_model(),
        &api_key,
        cfg.llm.temperature,
        Duration::from_secs(cfg.llm.timeouts.request.max(1)),
    )
    .map_err(|e| AgentError::ConfigError(e.to_string()))?;
    info!(model = %cfg.llm.model, "using OpenAI-compatible model gateway");
    Ok(Arc::new(gateway))
}

/// 注册全部内置工具
pub fn create_tool_registry(cfg: &AppConfig) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(CalculatorTool);
    tools.register(SearchTool::new(
        &cfg.tools.search.endpoint,
        cfg.tools.search.timeout_secs,
        cfg.tools.search.max_results,
    ));
    tools.register(UserDatabaseTool);
    tools.register(AnalyzeImageUrlTool);
    tools.register(AnalyzeLocalImageTool::new(
        cfg.tools.workspace_root.clone(),
        cfg.tools.image.max_bytes,
        cfg.tools.image.max_dimension,
    ));
    tools.register(AnalyzeImageDescriptionTool);
    tools
}

/// 系统提示词：配置的文件可读则用文件内容，否则用内置提示词
fn load_system_prompt(cfg: &AppConfig) -> String {
    let Some(path) = cfg.app.system_prompt_path.as_ref() else {
        return DEFAULT_SYSTEM_PROMPT.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => DEFAULT_SYSTEM_PROMPT.to_string(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "system prompt file unreadable, using built-in prompt");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

/// 创建 Agent 组件：从配置选择模型后端、注册工具
pub fn create_agent_components(cfg: &AppConfig) -> Result<AgentComponents, AgentError> {
    let gateway = create_gateway(cfg)?;
    Ok(create_agent_components_with_gateway(cfg, gateway))
}

/// 用给定的模型网关创建 Agent 组件（测试注入 Mock / Scripted 网关）
pub fn create_agent_components_with_gateway(
    cfg: &AppConfig,
    gateway: Arc<dyn ModelGateway>,
) -> AgentComponents {
    let registry = Arc::new(create_tool_registry(cfg));
    let executor = ToolExecutor::new(
        Arc::clone(&registry),
        cfg.tools.tool_timeout_secs,
        TaskScheduler::new(cfg.tools.max_concurrent),
    );
    let planner = Planner::new(Arc::clone(&gateway), load_system_prompt(cfg), registry.specs());
    info!(
        tools = registry.len(),
        model = gateway.model_id(),
        "agent components ready"
    );

    AgentComponents {
        config: cfg.clone(),
        gateway,
        planner: Arc::new(planner),
        executor: Arc::new(executor),
        sessions: Arc::new(SessionRegistry::new(Duration::from_secs(
            cfg.server.session_idle_secs,
        ))),
        shutdown: CancellationToken::new(),
    }
}

impl AgentComponents {
    /// 启动空闲会话清理任务；shutdown 取消后退出
    pub fn start_janitor(&self) -> JoinHandle<()> {
        self.sessions.spawn_janitor(
            Duration::from_secs(self.config.server.janitor_interval_secs.max(1)),
            self.shutdown.clone(),
        )
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.executor
            .registry()
            .descriptors()
            .into_iter()
            .map(Capability::from)
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.executor.registry().tool_names()
    }

    /// 丢弃会话的对话记录
    pub async fn reset_session(&self, session_id: &str) -> bool {
        self.sessions.reset(session_id).await
    }
}

/// 在会话锁内跑一轮编排
async fn run_turn(
    components: Arc<AgentComponents>,
    session_id: String,
    input: UserInput,
    event_tx: Option<mpsc::UnboundedSender<ReactEvent>>,
    cancel: CancellationToken,
) -> Result<String, AgentError> {
    let (_, session) = components.sessions.get_or_create(Some(&session_id)).await;
    let mut session = session.lock().await;

    let react = ReactSession::new(&components.planner, &components.executor, cancel)
        .with_max_tool_rounds(components.config.app.max_tool_rounds)
        .with_fallback_answer(&components.config.app.fallback_answer);
    let react = match event_tx.as_ref() {
        Some(tx) => react.with_event_tx(tx),
        None => react,
    };

    let result = react_loop(&react, &mut session.transcript, input).await;
    session.turns += 1;
    drop(session);
    components.sessions.touch(&session_id).await;

    let result = result?;
    info!(session_id = %session_id, rounds = result.rounds, "turn finished");
    Ok(result.answer)
}

/// 处理单条用户消息（无流式），返回 (最终回复, session_id)
///
/// 编排在独立任务中执行；同一会话的并发请求按会话锁排队。
pub async fn process_message(
    components: &Arc<AgentComponents>,
    session_id: Option<&str>,
    input: UserInput,
) -> Result<(String, String), AgentError> {
    let (session_id, _) = components.sessions.get_or_create(session_id).await;
    let handle = tokio::spawn(run_turn(
        Arc::clone(components),
        session_id.clone(),
        input,
        None,
        CancellationToken::new(),
    ));
    let answer = handle
        .await
        .map_err(|e| AgentError::TaskFailed(e.to_string()))??;
    Ok((answer, session_id))
}

/// 流式处理单条用户消息：返回 session_id 与对外事件接收端
pub async fn process_message_stream(
    components: &Arc<AgentComponents>,
    session_id: Option<&str>,
    input: UserInput,
    config: StreamConfig,
) -> (String, mpsc::Receiver<StreamEvent>) {
    let (session_id, _) = components.sessions.get_or_create(session_id).await;
    let components = Arc::clone(components);
    let sid = session_id.clone();
    let rx = spawn_stream(
        session_id.clone(),
        config,
        CancellationToken::new(),
        move |event_tx, cancel| run_turn(components, sid, input, Some(event_tx), cancel),
    );
    (session_id, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedGateway;
    use crate::memory::Message;

    fn mock_components() -> Arc<AgentComponents> {
        Arc::new(create_agent_components_with_gateway(
            &AppConfig::default(),
            Arc::new(MockGateway::new()),
        ))
    }

    #[test]
    fn test_registry_has_six_tools() {
        let registry = create_tool_registry(&AppConfig::default());
        assert_eq!(
            registry.tool_names(),
            vec![
                "calculator",
                "duckduckgo_search",
                "fetch_user_from_database",
                "analyze_image_url",
                "analyze_local_image",
                "analyze_image_description",
            ]
        );
    }

    #[test]
    fn test_mock_provider_selected() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        assert_eq!(create_gateway(&cfg).unwrap().model_id(), "mock");
        cfg.llm.provider = "nope".into();
        assert!(matches!(create_gateway(&cfg), Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_missing_prompt_file_uses_builtin() {
        let mut cfg = AppConfig::default();
        cfg.app.system_prompt_path = Some("/nonexistent/prompt.md".into());
        assert_eq!(load_system_prompt(&cfg), DEFAULT_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_process_message_calculator_flow() {
        let components = mock_components();
        let (answer, session_id) =
            process_message(&components, None, UserInput::new("calculate 2 + 2"))
                .await
                .unwrap();
        assert!(answer.contains('4'), "{answer}");
        assert!(components.sessions.contains(&session_id).await);
    }

    #[tokio::test]
    async fn test_session_keeps_history() {
        let gw = Arc::new(
            ScriptedGateway::new()
                .reply(Message::ai("first"))
                .reply(Message::ai("second")),
        );
        let components = Arc::new(create_agent_components_with_gateway(
            &AppConfig::default(),
            gw.clone(),
        ));
        let (_, sid) = process_message(&components, Some("s"), UserInput::new("a"))
            .await
            .unwrap();
        let (answer, _) = process_message(&components, Some(&sid), UserInput::new("b"))
            .await
            .unwrap();
        assert_eq!(answer, "second");
        let (_, session) = components.sessions.get_or_create(Some("s")).await;
        let session = session.lock().await;
        assert_eq!(session.turns, 2);
        assert_eq!(session.transcript.len(), 5);
    }

    #[test]
    fn test_capabilities_have_examples() {
        let components = create_agent_components_with_gateway(
            &AppConfig::default(),
            Arc::new(MockGateway::new()),
        );
        let caps = components.capabilities();
        assert_eq!(caps.len(), 6);
        assert!(caps.iter().all(|c| !c.examples.is_empty()));
    }
}
