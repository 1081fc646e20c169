//! 编排集成测试：工具调用与结果对应、未知工具、视觉分支、同步与流式回答一致

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use forager::agent::{
        create_agent_components_with_gateway, process_message, process_message_stream,
        AgentComponents,
    };
    use forager::config::AppConfig;
    use forager::core::TaskScheduler;
    use forager::llm::mock::GatewayRequest;
    use forager::llm::{MockGateway, ModelGateway, ScriptedGateway};
    use forager::memory::{Message, PendingToolCall, Role, Transcript};
    use forager::react::{react_loop, Planner, ReactSession, UserInput};
    use forager::stream::{StreamConfig, StreamEventKind};
    use forager::tools::{CalculatorTool, ToolExecutor, ToolRegistry};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn components(gateway: Arc<dyn ModelGateway>) -> Arc<AgentComponents> {
        Arc::new(create_agent_components_with_gateway(
            &AppConfig::default(),
            gateway,
        ))
    }

    fn tool_results(messages: &[Message]) -> Vec<(String, String)> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult {
                    tool_call_id,
                    output,
                    ..
                } => Some((tool_call_id.clone(), output.model_text().into_owned())),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_results_match_pending_calls() {
        let gw = ScriptedGateway::new()
            .reply(Message::ai_with_tool_calls(
                "",
                vec![
                    PendingToolCall::new("c1", "calculator", json!({"expression": "1 + 1"})),
                    PendingToolCall::new("c2", "calculator", json!({"expression": "2 * 3"})),
                    PendingToolCall::new("c3", "nonexistent_tool", json!({})),
                ],
            ))
            .reply(Message::ai("all done"));
        let mut registry = ToolRegistry::new();
        registry.register(CalculatorTool);
        let executor = ToolExecutor::new(Arc::new(registry), 5, TaskScheduler::new(2));
        let planner = Planner::new(Arc::new(gw), "sys", vec![]);
        let session = ReactSession::new(&planner, &executor, CancellationToken::new());
        let mut transcript = Transcript::new();

        let result = react_loop(&session, &mut transcript, UserInput::new("go"))
            .await
            .unwrap();
        assert_eq!(result.answer, "all done");

        let messages = transcript.messages();
        let ai_idx = messages
            .iter()
            .position(|m| m.has_tool_calls())
            .unwrap();
        let pending: HashSet<&str> = messages[ai_idx]
            .tool_calls()
            .iter()
            .map(|c| c.call_id.as_str())
            .collect();
        let results = tool_results(messages);
        let answered: HashSet<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(pending, answered);
        // 按列出顺序追加
        let order: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["c1", "c2", "c3"]);
        assert_eq!(results[0].1, "Result: 2");
        assert_eq!(results[1].1, "Result: 6");
    }

    #[tokio::test]
    async fn test_unknown_tool_text_is_stable() {
        let executor = ToolExecutor::new(Arc::new(ToolRegistry::new()), 5, TaskScheduler::new(1));
        let call = PendingToolCall::new("x", "nonexistent_tool", json!({"a": 1}));
        let first = executor.invoke(&call).await;
        let second = executor.invoke(&call).await;
        assert_eq!(first, second);
        assert_eq!(first.model_text(), "unknown tool: nonexistent_tool");
    }

    #[tokio::test]
    async fn test_deeply_nested_expression_is_tool_text() {
        let mut registry = ToolRegistry::new();
        registry.register(CalculatorTool);
        let executor = ToolExecutor::new(Arc::new(registry), 5, TaskScheduler::new(1));
        let expression = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        let call = PendingToolCall::new("deep", "calculator", json!({ "expression": expression }));
        let text = executor.invoke(&call).await.model_text().into_owned();
        assert!(text.starts_with("Error calculating '"), "{}", &text[..40]);
        assert!(text.ends_with("expression too deeply nested"));

        // 同一进程里后续会话照常工作
        let components = components(Arc::new(MockGateway::new()));
        let deep_minus = format!("calculate {}1", "-".repeat(200_000));
        let (answer, _) = process_message(&components, None, UserInput::new(deep_minus))
            .await
            .unwrap();
        assert!(!answer.is_empty());
        let (answer, _) = process_message(&components, None, UserInput::new("calculate 2 + 2"))
            .await
            .unwrap();
        assert!(answer.contains('4'), "{answer}");
    }

    #[tokio::test]
    async fn test_unknown_tool_loop_continues() {
        let gw = Arc::new(
            ScriptedGateway::new()
                .call_tool("c1", "nonexistent_tool", json!({}))
                .reply(Message::ai("recovered")),
        );
        let components = components(gw.clone());
        let (answer, sid) = process_message(&components, None, UserInput::new("try it"))
            .await
            .unwrap();
        assert_eq!(answer, "recovered");

        let (_, session) = components.sessions.get_or_create(Some(&sid)).await;
        let session = session.lock().await;
        assert_eq!(
            tool_results(session.transcript.messages()),
            vec![("c1".to_string(), "unknown tool: nonexistent_tool".to_string())]
        );
        // 第二次询问模型时可以看到工具结果
        match &gw.requests()[1] {
            GatewayRequest::WithTools { messages, .. } => {
                assert_eq!(messages.last().map(|m| m.role()), Some(Role::ToolResult))
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_direct_answer_single_ai_and_stream_matches() {
        let answer = "The capital of France is Paris.";
        let sync = components(Arc::new(ScriptedGateway::new().reply(Message::ai(answer))));
        let (sync_answer, sid) = process_message(&sync, None, UserInput::new("capital?"))
            .await
            .unwrap();
        {
            let (_, session) = sync.sessions.get_or_create(Some(&sid)).await;
            let session = session.lock().await;
            let ai_count = session
                .transcript
                .messages()
                .iter()
                .filter(|m| m.role() == Role::Ai)
                .count();
            assert_eq!(ai_count, 1);
        }

        let streaming = components(Arc::new(ScriptedGateway::new().reply(Message::ai(answer))));
        let (_, mut rx) = process_message_stream(
            &streaming,
            None,
            UserInput::new("capital?"),
            StreamConfig::unpaced(),
        )
        .await;
        let mut streamed = String::new();
        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            if ev.event == StreamEventKind::Token {
                streamed.push_str(&ev.data);
            }
            kinds.push(ev.event);
        }
        assert_eq!(streamed, sync_answer);
        assert!(!kinds.contains(&StreamEventKind::ToolStart));
        assert_eq!(kinds.last(), Some(&StreamEventKind::Done));
    }

    #[tokio::test]
    async fn test_calculate_two_plus_two() {
        let components = components(Arc::new(MockGateway::new()));
        let (answer, sid) = process_message(&components, None, UserInput::new("calculate 2 + 2"))
            .await
            .unwrap();
        assert!(answer.contains('4'), "{answer}");

        let (_, session) = components.sessions.get_or_create(Some(&sid)).await;
        let session = session.lock().await;
        let messages = session.transcript.messages();
        let call = messages
            .iter()
            .flat_map(|m| m.tool_calls().iter())
            .next()
            .unwrap();
        assert_eq!(call.name, "calculator");
        assert!(tool_results(messages)[0].1.contains('4'));
    }

    #[tokio::test]
    async fn test_url_sentinel_selects_vision_without_looping() {
        let gw = Arc::new(
            ScriptedGateway::new()
                .call_tool("v1", "legacy_image", json!({}))
                .vision_reply("A red square."),
        );
        let mut registry = ToolRegistry::new();
        registry.register_fn("legacy_image", "returns a url sentinel", |_| {
            Ok("IMAGE_URL_READY:https://example.com/red.png".to_string())
        });
        let executor = ToolExecutor::new(Arc::new(registry), 5, TaskScheduler::new(1));
        let planner = Planner::new(gw.clone(), "sys", vec![]);
        let session = ReactSession::new(&planner, &executor, CancellationToken::new());
        let mut transcript = Transcript::new();

        let result = react_loop(&session, &mut transcript, UserInput::new("show me"))
            .await
            .unwrap();
        assert_eq!(
            result.answer,
            "Image analysis for Image from URL: https://example.com/red.png:\n\nA red square."
        );
        assert_eq!(result.rounds, 1);
        let last = transcript.messages().last().unwrap();
        assert_eq!(last.role(), Role::Ai);
        assert!(!last.has_tool_calls());
        assert!(matches!(gw.requests()[1], GatewayRequest::Vision { .. }));
        assert_eq!(gw.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_same_session_requests_queue() {
        let components = components(Arc::new(MockGateway::new()));
        let c1 = Arc::clone(&components);
        let c2 = Arc::clone(&components);
        let (a, b) = tokio::join!(
            process_message(&c1, Some("shared"), UserInput::new("hello one")),
            process_message(&c2, Some("shared"), UserInput::new("hello two")),
        );
        assert!(a.is_ok() && b.is_ok());

        let (_, session) = components.sessions.get_or_create(Some("shared")).await;
        let session = session.lock().await;
        assert_eq!(session.turns, 2);
        let roles: Vec<Role> = session.transcript.messages().iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec![Role::System, Role::Human, Role::Ai, Role::Human, Role::Ai]);
    }
}
