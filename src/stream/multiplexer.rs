//! 流式多路器
//!
//! 编排在独立任务中运行，通过无界通道推送 ReactEvent；多路器按阶段切换生成 tool_start / tool_end，
//! 编排结束后把回答按空白切成 token，最后发出唯一的终止事件。
//! 对外通道有界；send_timeout 超时或消费者断开即停止转发并取消编排（编排在下一次进入 DECIDE 时退出）。

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamSection;
use crate::core::{AgentError, Phase};
use crate::react::ReactEvent;
use crate::stream::{StreamEvent, StreamEventKind};

const CONNECTED_TEXT: &str = "Stream started";
const TOOL_START_TEXT: &str = "Executing tools...";
const TOOL_END_TEXT: &str = "Tools completed";

/// 流参数
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub buffer: usize,
    pub token_delay: Duration,
    pub event_delay: Duration,
    pub consumer_timeout: Duration,
}

impl StreamConfig {
    /// 不做节奏控制（测试与 CLI 用）
    pub fn unpaced() -> Self {
        Self {
            token_delay: Duration::ZERO,
            event_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::from(&StreamSection::default())
    }
}

impl From<&StreamSection> for StreamConfig {
    fn from(s: &StreamSection) -> Self {
        Self {
            buffer: s.buffer.max(1),
            token_delay: Duration::from_millis(s.token_delay_ms),
            event_delay: Duration::from_millis(s.event_delay_ms),
            consumer_timeout: Duration::from_secs(s.consumer_timeout_secs.max(1)),
        }
    }
}

/// 阶段跟踪：DECIDE → DISPATCH_TOOLS 发 tool_start，DISPATCH_TOOLS → DECIDE 发 tool_end
#[derive(Debug, Default, Clone)]
pub struct PhaseTracker {
    in_tools: bool,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&mut self, ev: &ReactEvent) -> Option<(StreamEventKind, &'static str)> {
        let ReactEvent::PhaseEntered { phase } = ev else {
            return None;
        };
        match (self.in_tools, phase) {
            (false, Phase::DispatchTools) => {
                self.in_tools = true;
                Some((StreamEventKind::ToolStart, TOOL_START_TEXT))
            }
            (true, Phase::Decide) => {
                self.in_tools = false;
                Some((StreamEventKind::ToolEnd, TOOL_END_TEXT))
            }
            _ => None,
        }
    }
}

/// 按空白切分回答；除最后一个外每个 token 带一个尾随空格
pub fn tokenize(answer: &str) -> Vec<String> {
    let words: Vec<&str> = answer.split_whitespace().collect();
    let last = words.len().saturating_sub(1);
    words
        .iter()
        .enumerate()
        .map(|(i, w)| if i < last { format!("{w} ") } else { (*w).to_string() })
        .collect()
}

/// 对外发送端：保证终止事件唯一，消费者掉线后静默
struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
    session_id: String,
    config: StreamConfig,
    cancel: CancellationToken,
    closed: bool,
    terminated: bool,
}

impl Emitter {
    async fn emit(&mut self, kind: StreamEventKind, data: impl Into<String>) -> bool {
        if self.closed || self.terminated {
            return false;
        }
        let event = StreamEvent::new(kind, data, self.session_id.clone());
        if let Err(e) = self.tx.send_timeout(event, self.config.consumer_timeout).await {
            let reason = match e {
                mpsc::error::SendTimeoutError::Timeout(_) => "consumer timeout",
                mpsc::error::SendTimeoutError::Closed(_) => "consumer disconnected",
            };
            self.close(reason);
            return false;
        }
        if kind.is_terminal() {
            self.terminated = true;
            return true;
        }
        let delay = if kind == StreamEventKind::Token {
            self.config.token_delay
        } else {
            self.config.event_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        true
    }

    fn close(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        warn!(session_id = %self.session_id, reason, "stream stopped, cancelling turn");
        self.closed = true;
        self.cancel.cancel();
    }

    async fn finish(&mut self, outcome: Result<String, AgentError>) {
        match outcome {
            Ok(answer) => {
                for token in tokenize(&answer) {
                    if !self.emit(StreamEventKind::Token, token).await {
                        return;
                    }
                }
                self.emit(StreamEventKind::Done, "").await;
            }
            Err(e) => {
                self.emit(StreamEventKind::Error, e.to_string()).await;
            }
        }
    }
}

/// 启动一条流：run 在独立任务中执行编排，拿到事件发送端与取消令牌，返回最终回答
///
/// 返回的接收端依次收到 connected、工具阶段事件、token 与唯一的终止事件。
pub fn spawn_stream<F, Fut>(
    session_id: String,
    config: StreamConfig,
    cancel: CancellationToken,
    run: F,
) -> mpsc::Receiver<StreamEvent>
where
    F: FnOnce(UnboundedSender<ReactEvent>, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<String, AgentError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.buffer.max(1));
    tokio::spawn(async move {
        let mut emitter = Emitter {
            tx,
            session_id: session_id.clone(),
            config,
            cancel: cancel.clone(),
            closed: false,
            terminated: false,
        };
        emitter
            .emit(StreamEventKind::Connected, CONNECTED_TEXT)
            .await;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ReactEvent>();
        let orchestration = tokio::spawn(run(event_tx, cancel));

        let mut tracker = PhaseTracker::new();
        let watch = emitter.tx.clone();
        // 编排任务结束时发送端随之释放，循环退出
        loop {
            tokio::select! {
                ev = event_rx.recv() => {
                    let Some(ev) = ev else { break };
                    debug!(session_id = %session_id, event = ?ev, "react event");
                    if let Some((kind, data)) = tracker.on_event(&ev) {
                        emitter.emit(kind, data).await;
                    }
                }
                _ = watch.closed(), if !emitter.closed => {
                    emitter.close("consumer disconnected");
                }
            }
        }
        drop(watch);

        let outcome = match orchestration.await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(AgentError::TaskFailed(join_err.to_string())),
        };
        if let Err(e) = &outcome {
            info!(session_id = %session_id, error = %e, "stream turn failed");
        }
        emitter.finish(outcome).await;
    });
    rx
}
