//! 工具执行器
//!
//! 持有共享的 ToolRegistry、单次超时与并发调度器。invoke 永不失败：未知工具、工具报错、超时、panic
//! 都转为文本结果，保证每个待执行调用恰好得到一个结果；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::time::timeout;

use crate::core::TaskScheduler;
use crate::memory::{PendingToolCall, ToolOutput};
use crate::tools::ToolRegistry;

/// 工具执行器：对每次调用施加超时，失败一律转为文本结果
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    scheduler: TaskScheduler,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64, scheduler: TaskScheduler) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            scheduler,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 执行单个调用
    pub async fn invoke(&self, call: &PendingToolCall) -> ToolOutput {
        let start = Instant::now();
        let name = call.name.as_str();

        let Some(tool) = self.registry.get(name) else {
            audit(call, false, "unknown_tool", start);
            return ToolOutput::text(format!("unknown tool: {name}"));
        };

        let _permit = self.scheduler.acquire_tool().await;
        let args = call.arguments.clone();
        // 在独立任务中执行，panic 只会体现为 JoinError
        let mut handle = tokio::spawn(async move { tool.execute(args).await });

        let (output, outcome) = match timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(output))) => (output, "ok"),
            Ok(Ok(Err(e))) => (
                ToolOutput::text(format!("Error executing {name}: {e}")),
                "error",
            ),
            Ok(Err(join_err)) => {
                let reason = if join_err.is_panic() {
                    "tool panicked"
                } else {
                    "tool task aborted"
                };
                (
                    ToolOutput::text(format!("Error executing {name}: {reason}")),
                    "panic",
                )
            }
            Err(_) => {
                handle.abort();
                (
                    ToolOutput::text(format!(
                        "Error executing {name}: timed out after {}s",
                        self.timeout.as_secs_f32()
                    )),
                    "timeout",
                )
            }
        };
        audit(call, outcome == "ok", outcome, start);
        output
    }

    /// 批量执行；结果与输入一一对应、顺序一致，调用之间可并行
    pub async fn invoke_batch(&self, calls: &[PendingToolCall]) -> Vec<ToolOutput> {
        join_all(calls.iter().map(|call| self.invoke(call))).await
    }
}

fn audit(call: &PendingToolCall, ok: bool, outcome: &str, start: Instant) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": call.name,
        "call_id": call.call_id,
        "ok": ok,
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": args_preview(&call.arguments),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
