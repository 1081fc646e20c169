//! 流式集成测试：事件顺序与终止事件唯一性

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use forager::agent::{create_agent_components_with_gateway, process_message_stream};
    use forager::config::AppConfig;
    use forager::core::{AgentError, TaskScheduler};
    use forager::llm::{LlmError, ScriptedGateway};
    use forager::memory::{Message, ToolOutput, Transcript};
    use forager::react::{react_loop, Planner, ReactSession, UserInput};
    use forager::stream::{spawn_stream, StreamConfig, StreamEvent, StreamEventKind};
    use forager::tools::{CalculatorTool, ToolExecutor, ToolRegistry};
    use proptest::prelude::*;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev);
        }
        out
    }

    fn position(kinds: &[StreamEventKind], kind: StreamEventKind) -> Vec<usize> {
        kinds
            .iter()
            .enumerate()
            .filter(|(_, k)| **k == kind)
            .map(|(i, _)| i)
            .collect()
    }

    #[tokio::test]
    async fn test_single_tool_phase_ordering() {
        let gw = ScriptedGateway::new()
            .call_tool("c1", "calculator", json!({"expression": "2 + 2"}))
            .reply(Message::ai("The result is 4"));
        let components = Arc::new(create_agent_components_with_gateway(
            &AppConfig::default(),
            Arc::new(gw),
        ));
        let (session_id, rx) = process_message_stream(
            &components,
            None,
            UserInput::new("calculate 2 + 2"),
            StreamConfig::unpaced(),
        )
        .await;
        let events = collect(rx).await;
        let kinds: Vec<StreamEventKind> = events.iter().map(|e| e.event).collect();

        assert_eq!(kinds.first(), Some(&StreamEventKind::Connected));
        assert_eq!(kinds.last(), Some(&StreamEventKind::Done));
        let starts = position(&kinds, StreamEventKind::ToolStart);
        let ends = position(&kinds, StreamEventKind::ToolEnd);
        assert_eq!(starts.len(), 1);
        assert_eq!(ends.len(), 1);
        assert!(starts[0] < ends[0]);
        let tokens = position(&kinds, StreamEventKind::Token);
        assert!(tokens.iter().all(|&i| i > ends[0]));

        let text: String = events
            .iter()
            .filter(|e| e.event == StreamEventKind::Token)
            .map(|e| e.data.as_str())
            .collect();
        assert_eq!(text, "The result is 4");
        assert!(events.iter().all(|e| e.session_id == session_id));
        assert_eq!(events[starts[0]].data, "Executing tools...");
        assert_eq!(events[ends[0]].data, "Tools completed");
    }

    #[tokio::test]
    async fn test_paced_stream_keeps_order() {
        let gw = ScriptedGateway::new().reply(Message::ai("one two three"));
        let components = Arc::new(create_agent_components_with_gateway(
            &AppConfig::default(),
            Arc::new(gw),
        ));
        let config = StreamConfig {
            token_delay: std::time::Duration::from_millis(2),
            event_delay: std::time::Duration::from_millis(2),
            buffer: 1,
            ..StreamConfig::unpaced()
        };
        let (_, rx) = process_message_stream(&components, None, UserInput::new("hi"), config).await;
        let data: Vec<String> = collect(rx).await.into_iter().map(|e| e.data).collect();
        assert_eq!(data, vec!["Stream started", "one ", "two ", "three", ""]);
    }

    #[tokio::test]
    async fn test_invariant_violation_ends_with_single_error() {
        let rx = spawn_stream(
            "broken".to_string(),
            StreamConfig::unpaced(),
            CancellationToken::new(),
            |_event_tx, _cancel| async move {
                let mut transcript = Transcript::new();
                transcript.append(Message::human("hi"))?;
                // 没有待回答的调用，工具结果无处挂靠
                transcript.append(Message::tool_result(
                    "ghost",
                    "calculator",
                    ToolOutput::text("Result: 1"),
                ))?;
                Ok::<_, AgentError>("unreachable".to_string())
            },
        );
        let events = collect(rx).await;
        let kinds: Vec<StreamEventKind> = events.iter().map(|e| e.event).collect();
        assert_eq!(
            kinds,
            vec![StreamEventKind::Connected, StreamEventKind::Error]
        );
        assert!(events[1].data.starts_with("Invariant violation:"), "{}", events[1].data);
        assert!(events[1].data.contains("ghost"));
    }

    /// 每个脚本步骤：工具调用 / 直接回答 / 模型报错
    #[derive(Debug, Clone)]
    enum Step {
        Tool(&'static str),
        Answer(String),
        Fail,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            prop::sample::select(vec!["calculator", "nonexistent_tool"]).prop_map(Step::Tool),
            "[a-z]{1,6}( [a-z]{1,6}){0,4}".prop_map(Step::Answer),
            Just(Step::Fail),
        ]
    }

    fn run_case(steps: Vec<Step>, plain_ok: bool, max_rounds: usize, cancel_first: bool) -> Vec<StreamEvent> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let mut gw = ScriptedGateway::new();
            for (i, s) in steps.into_iter().enumerate() {
                gw = match s {
                    Step::Tool(name) => {
                        gw.call_tool(&format!("c{i}"), name, json!({"expression": "1 + 2"}))
                    }
                    Step::Answer(text) => gw.reply(Message::ai(text)),
                    Step::Fail => gw.fail(LlmError::Network("injected".into())),
                };
            }
            gw = if plain_ok {
                gw.plain_reply("plain fallback")
            } else {
                gw.plain_fail(LlmError::Api {
                    status: 500,
                    message: "injected".into(),
                })
            };

            let mut registry = ToolRegistry::new();
            registry.register(CalculatorTool);
            let executor = Arc::new(ToolExecutor::new(
                Arc::new(registry),
                5,
                TaskScheduler::new(2),
            ));
            let planner = Arc::new(Planner::new(Arc::new(gw), "sys", vec![]));
            let cancel = CancellationToken::new();
            if cancel_first {
                cancel.cancel();
            }

            let rx = spawn_stream(
                "prop".to_string(),
                StreamConfig::unpaced(),
                cancel,
                move |event_tx, cancel| async move {
                    let session = ReactSession::new(&planner, &executor, cancel)
                        .with_max_tool_rounds(max_rounds)
                        .with_event_tx(&event_tx);
                    let mut transcript = Transcript::new();
                    let result = react_loop(&session, &mut transcript, UserInput::new("go")).await?;
                    if transcript.messages().last().map(|m| m.has_tool_calls()) == Some(true) {
                        return Err(AgentError::TaskFailed("ended with pending calls".into()));
                    }
                    Ok(result.answer)
                },
            );
            collect(rx).await
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        #[test]
        fn prop_exactly_one_terminal_event(
            steps in prop::collection::vec(step(), 0..8),
            plain_ok in any::<bool>(),
            max_rounds in 1usize..4,
            cancel_first in prop::bool::weighted(0.1),
        ) {
            let events = run_case(steps, plain_ok, max_rounds, cancel_first);
            let kinds: Vec<StreamEventKind> = events.iter().map(|e| e.event).collect();

            prop_assert_eq!(kinds.first(), Some(&StreamEventKind::Connected));
            let terminals = kinds.iter().filter(|k| k.is_terminal()).count();
            prop_assert_eq!(terminals, 1);
            prop_assert!(kinds.last().map(|k| k.is_terminal()).unwrap_or(false));
            if cancel_first {
                prop_assert_eq!(kinds.last(), Some(&StreamEventKind::Error));
            }

            // tool_start / tool_end 交替出现，且 token 都在最后一个 tool_end 之后
            let mut open = false;
            for k in &kinds {
                match k {
                    StreamEventKind::ToolStart => { prop_assert!(!open); open = true; }
                    StreamEventKind::ToolEnd => { prop_assert!(open); open = false; }
                    StreamEventKind::Token => prop_assert!(!open),
                    _ => {}
                }
            }
            let last_end = position(&kinds, StreamEventKind::ToolEnd).last().copied();
            let first_token = position(&kinds, StreamEventKind::Token).first().copied();
            if let (Some(end), Some(tok)) = (last_end, first_token) {
                prop_assert!(tok > end);
            }
        }
    }
}
