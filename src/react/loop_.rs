//! ReAct 主循环
//!
//! DECIDE -> DISPATCH_TOOLS -> DECIDE ... -> DONE。DECIDE 检查取消与工具轮次上限、问 Planner、追加 ai 消息；
//! DISPATCH_TOOLS 按列出顺序执行所有待执行调用并按同样顺序追加结果；DONE 取本轮最终回答。
//! 可选 event_tx：向流式多路器推送阶段切换 / 模型回复 / ToolCall / Observation / Answer。

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{AgentError, Phase};
use crate::memory::{ImageSource, Message, Transcript};
use crate::react::{Planner, ReactEvent};
use crate::tools::ToolExecutor;

/// 默认最大工具轮次
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;
/// 没有可用回答时的兜底文本
pub const DEFAULT_FALLBACK_ANSWER: &str = "I couldn't generate a response.";
/// 上一轮中途放弃、残留的待执行调用统一以此文本作答
const ABANDONED_CALL_TEXT: &str = "Tool call abandoned before completion.";
/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 一条用户输入：文本 + 可选图片
#[derive(Debug, Clone, Default)]
pub struct UserInput {
    pub text: String,
    pub images: Vec<ImageSource>,
}

impl UserInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<ImageSource>) -> Self {
        self.images = images;
        self
    }

    pub fn into_message(self) -> Message {
        if self.images.is_empty() {
            Message::human(self.text)
        } else {
            Message::human_with_images(self.text, self.images)
        }
    }
}

/// 单轮执行结果：最终回答与本轮走过的工具轮次
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactResult {
    pub answer: String,
    pub rounds: usize,
}

/// ReAct 会话配置
pub struct ReactSession<'a> {
    /// Planner（必需）
    pub planner: &'a Planner,
    /// 工具执行器（必需）
    pub executor: &'a ToolExecutor,
    /// 取消令牌（必需）
    pub cancel_token: CancellationToken,
    /// 工具轮次上限
    pub max_tool_rounds: usize,
    /// 兜底回答
    pub fallback_answer: &'a str,
    /// 可选：事件推送通道
    pub event_tx: Option<&'a UnboundedSender<ReactEvent>>,
}

impl<'a> ReactSession<'a> {
    /// 创建最小配置的 ReactSession
    pub fn new(
        planner: &'a Planner,
        executor: &'a ToolExecutor,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            planner,
            executor,
            cancel_token,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            fallback_answer: DEFAULT_FALLBACK_ANSWER,
            event_tx: None,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_fallback_answer(mut self, answer: &'a str) -> Self {
        self.fallback_answer = answer;
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }
}

fn send_event(tx: &Option<&UnboundedSender<ReactEvent>>, ev: ReactEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!(
            "{}...",
            text.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>()
        )
    } else {
        text.to_string()
    }
}

/// 本轮答案：仅看记录的最后一条消息，避免复用上一轮的回答
fn answer_of(transcript: &Transcript, fallback: &str) -> String {
    match transcript.current_exchange().last() {
        Some(Message::Ai {
            content,
            tool_calls,
        }) if tool_calls.is_empty() && !content.trim().is_empty() => content.clone(),
        _ => fallback.to_string(),
    }
}

/// 执行一轮对话：追加用户消息，跑状态机直到 DONE
///
/// 模型与工具错误不会从这里返回（已分别降级为 ai 消息和文本结果）；
/// 只有 Transcript 不变量被破坏或收到取消时返回错误。
pub async fn react_loop(
    session: &ReactSession<'_>,
    transcript: &mut Transcript,
    input: UserInput,
) -> Result<ReactResult, AgentError> {
    let tx = &session.event_tx;

    let resolved = transcript.resolve_outstanding(ABANDONED_CALL_TEXT)?;
    if resolved > 0 {
        warn!(count = resolved, "resolved tool calls left from an abandoned turn");
    }
    transcript.append(input.into_message())?;

    let mut phase = Phase::Decide;
    let mut rounds = 0usize;

    loop {
        send_event(tx, ReactEvent::PhaseEntered { phase });
        debug!(phase = %phase, rounds, "phase entered");

        match phase {
            Phase::Decide => {
                if session.cancel_token.is_cancelled() {
                    info!(rounds, "turn cancelled");
                    return Err(AgentError::Cancelled);
                }
                if rounds >= session.max_tool_rounds {
                    warn!(rounds, "tool round cap reached");
                    transcript.append(Message::ai(format!(
                        "Stopped after {rounds} tool rounds without reaching a final answer."
                    )))?;
                    phase = Phase::Done;
                    continue;
                }
                transcript.ensure_system_prompt(session.planner.system_prompt());

                let outcome = session.planner.respond(transcript).await;
                let pending = outcome.message.tool_calls().len();
                info!(route = outcome.route.as_str(), pending, "model responded");
                send_event(
                    tx,
                    ReactEvent::ModelResponded {
                        route: outcome.route,
                        pending_calls: pending,
                    },
                );
                transcript.append(outcome.message)?;
                phase = if pending > 0 {
                    Phase::DispatchTools
                } else {
                    Phase::Done
                };
            }
            Phase::DispatchTools => {
                let calls = transcript.outstanding_calls();
                for call in &calls {
                    send_event(
                        tx,
                        ReactEvent::ToolCall {
                            call_id: call.call_id.clone(),
                            tool: call.name.clone(),
                            args: call.arguments.clone(),
                        },
                    );
                }
                let outputs = session.executor.invoke_batch(&calls).await;
                for (call, output) in calls.into_iter().zip(outputs) {
                    send_event(
                        tx,
                        ReactEvent::Observation {
                            call_id: call.call_id.clone(),
                            tool: call.name.clone(),
                            preview: preview(&output.model_text()),
                        },
                    );
                    transcript.append(Message::tool_result(call.call_id, call.name, output))?;
                }
                rounds += 1;
                phase = Phase::Decide;
            }
            Phase::Done => {
                let answer = answer_of(transcript, session.fallback_answer);
                send_event(
                    tx,
                    ReactEvent::Answer {
                        text: answer.clone(),
                    },
                );
                return Ok(ReactResult { answer, rounds });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskScheduler;
    use crate::llm::{LlmError, ScriptedGateway};
    use crate::memory::{Role, ToolOutput};
    use crate::react::Route;
    use crate::tools::ToolRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register_fn("echo", "echo text", |args| {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        });
        ToolExecutor::new(Arc::new(registry), 5, TaskScheduler::new(2))
    }

    fn planner(gw: ScriptedGateway) -> Planner {
        Planner::new(Arc::new(gw), "system prompt", vec![])
    }

    #[tokio::test]
    async fn test_direct_answer_single_ai_message() {
        let planner = planner(ScriptedGateway::new().reply(Message::ai("hi there")));
        let executor = executor();
        let session = ReactSession::new(&planner, &executor, CancellationToken::new());
        let mut t = Transcript::new();

        let result = react_loop(&session, &mut t, UserInput::new("hello"))
            .await
            .unwrap();
        assert_eq!(result.answer, "hi there");
        assert_eq!(result.rounds, 0);
        let roles: Vec<Role> = t.messages().iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec![Role::System, Role::Human, Role::Ai]);
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let planner = planner(
            ScriptedGateway::new()
                .reply(Message::ai_with_tool_calls(
                    "",
                    vec![
                        crate::memory::PendingToolCall::new("a", "echo", json!({"text": "one"})),
                        crate::memory::PendingToolCall::new("b", "nope", json!({})),
                    ],
                ))
                .reply(Message::ai("done")),
        );
        let executor = executor();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session =
            ReactSession::new(&planner, &executor, CancellationToken::new()).with_event_tx(&tx);
        let mut t = Transcript::new();

        let result = react_loop(&session, &mut t, UserInput::new("go"))
            .await
            .unwrap();
        assert_eq!(result.answer, "done");
        assert_eq!(result.rounds, 1);

        let results: Vec<(&str, String)> = t
            .messages()
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult {
                    tool_call_id,
                    output,
                    ..
                } => Some((tool_call_id.as_str(), output.model_text().into_owned())),
                _ => None,
            })
            .collect();
        assert_eq!(
            results,
            vec![
                ("a", "one".to_string()),
                ("b", "unknown tool: nope".to_string())
            ]
        );

        drop(tx);
        let mut phases = Vec::new();
        while let Some(ev) = rx.recv().await {
            if let ReactEvent::PhaseEntered { phase } = ev {
                phases.push(phase);
            }
        }
        assert_eq!(
            phases,
            vec![Phase::Decide, Phase::DispatchTools, Phase::Decide, Phase::Done]
        );
    }

    #[tokio::test]
    async fn test_round_cap_stops_loop() {
        let planner = planner(
            ScriptedGateway::new()
                .call_tool("a", "echo", json!({"text": "x"}))
                .call_tool("b", "echo", json!({"text": "y"})),
        );
        let executor = executor();
        let session = ReactSession::new(&planner, &executor, CancellationToken::new())
            .with_max_tool_rounds(2);
        let mut t = Transcript::new();

        let result = react_loop(&session, &mut t, UserInput::new("loop"))
            .await
            .unwrap();
        assert_eq!(
            result.answer,
            "Stopped after 2 tool rounds without reaching a final answer."
        );
        assert_eq!(result.rounds, 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_decide() {
        let planner = planner(ScriptedGateway::new());
        let executor = executor();
        let token = CancellationToken::new();
        token.cancel();
        let session = ReactSession::new(&planner, &executor, token);
        let mut t = Transcript::new();

        let err = react_loop(&session, &mut t, UserInput::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[tokio::test]
    async fn test_blank_answer_uses_fallback() {
        let planner = planner(ScriptedGateway::new().reply(Message::ai("   ")));
        let executor = executor();
        let session = ReactSession::new(&planner, &executor, CancellationToken::new())
            .with_fallback_answer("nothing");
        let mut t = Transcript::new();
        t.append(Message::human("earlier")).unwrap();
        t.append(Message::ai("earlier answer")).unwrap();

        let result = react_loop(&session, &mut t, UserInput::new("again"))
            .await
            .unwrap();
        assert_eq!(result.answer, "nothing");
    }

    #[tokio::test]
    async fn test_gateway_failure_still_ends_with_ai() {
        let planner = planner(
            ScriptedGateway::new()
                .fail(LlmError::Network("x".into()))
                .fail(LlmError::Network("y".into()))
                .plain_fail(LlmError::Network("z".into())),
        );
        let executor = executor();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session =
            ReactSession::new(&planner, &executor, CancellationToken::new()).with_event_tx(&tx);
        let mut t = Transcript::new();

        let result = react_loop(&session, &mut t, UserInput::new("hi"))
            .await
            .unwrap();
        assert_eq!(result.answer, "Error: network error: z");
        assert_eq!(t.messages().last().map(|m| m.role()), Some(Role::Ai));
        drop(tx);
        let mut routes = Vec::new();
        while let Some(ev) = rx.recv().await {
            if let ReactEvent::ModelResponded { route, .. } = ev {
                routes.push(route);
            }
        }
        assert_eq!(routes, vec![Route::Synthesized]);
    }

    #[tokio::test]
    async fn test_abandoned_calls_resolved_at_turn_start() {
        let planner = planner(ScriptedGateway::new().reply(Message::ai("ok")));
        let executor = executor();
        let session = ReactSession::new(&planner, &executor, CancellationToken::new());
        let mut t = Transcript::new();
        t.append(Message::human("first")).unwrap();
        t.append(Message::ai_with_tool_calls(
            "",
            vec![crate::memory::PendingToolCall::new("x", "echo", json!({}))],
        ))
        .unwrap();

        react_loop(&session, &mut t, UserInput::new("second"))
            .await
            .unwrap();
        assert!(t.outstanding_calls().is_empty());
        assert!(t.messages().iter().any(|m| matches!(
            m,
            Message::ToolResult { output, .. } if *output == ToolOutput::text(ABANDONED_CALL_TEXT)
        )));
    }
}
