use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tern_model::{ErrorKind, ModelMessage, ToolCallRequest};
use tern_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use tokio::time::timeout;

use crate::checkpoint::{Checkpointer, MemoryCheckpointer};
use crate::tool::{Error as ToolError, Tool, ToolResult};
use crate::{AgentBuilder, AgentError, STEP_LIMIT_MESSAGE};

static ECHO_SCHEMA: &Value = &Value::Null;

#[derive(Deserialize)]
struct EchoInput {
    text: String,
}

/// Echoes its input back, or fails when asked to.
struct EchoTool;

impl Tool for EchoTool {
    type Input = EchoInput;

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the text back."
    }

    fn parameter_schema(&self) -> &Value {
        ECHO_SCHEMA
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        async move {
            if input.text == "fail" {
                return Err(ToolError::execution_error().with_reason("boom"));
            }
            Ok(input.text)
        }
    }
}

fn tool_call(id: &str, name: &str, arguments: Value) -> PresetEvent {
    PresetEvent::ToolCall(ToolCallRequest {
        id: id.to_owned(),
        name: name.to_owned(),
        arguments,
    })
}

fn tool_results(messages: &[ModelMessage]) -> Vec<(String, String, bool)> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            ModelMessage::Tool(result) => Some((
                result.id.clone(),
                result.content.clone(),
                result.is_error,
            )),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_simple_message() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("Hi, ".to_owned()),
        PresetEvent::MessageDelta("what can I do for you?".to_owned()),
    ]));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_system_prompt("Now: {system_time}")
        .with_tool(EchoTool)
        .build();
    let state = agent.invoke("1", "Hello").await.unwrap();

    assert_eq!(state.len(), 2);
    assert_eq!(state.messages()[0], ModelMessage::user("Hello"));
    assert_eq!(state.final_answer(), Some("Hi, what can I do for you?"));

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 1);
    let ModelMessage::System { content } = &requests[0].messages[0] else {
        panic!("expected a leading system message");
    };
    assert!(content.starts_with("Now: "));
    assert!(!content.contains("{system_time}"));
    assert_eq!(requests[0].messages[1], ModelMessage::user("Hello"));
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0].name, "echo");
}

#[tokio::test]
async fn test_tool_round_trip() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::tool_call(
        "call:1",
        "echo",
        json!({ "text": "pong" }),
    ));
    model_provider.add_response(PresetResponse::text("The tool said pong."));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(EchoTool)
        .build();
    let state = agent.invoke("1", "Ping the tool").await.unwrap();

    // user, assistant (tool call), tool, assistant
    assert_eq!(state.len(), 4);
    assert_eq!(
        tool_results(state.messages()),
        vec![("call:1".to_owned(), "pong".to_owned(), false)]
    );
    assert_eq!(state.final_answer(), Some("The tool said pong."));

    // The tool result is fed back to the model.
    let requests = model_provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages.len(), 4);
    assert!(matches!(requests[1].messages[3], ModelMessage::Tool(_)));
}

#[tokio::test]
async fn test_multiple_tool_calls() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        tool_call("call:a", "echo", json!({ "text": "first" })),
        tool_call("call:b", "search", json!({ "query": "rust" })),
        tool_call("call:c", "echo", json!({ "text": "fail" })),
        tool_call("call:d", "echo", json!({ "text": "last" })),
    ]));
    model_provider.add_response(PresetResponse::text("Done."));

    let agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(EchoTool)
        .build();
    let state = agent.invoke("1", "Go").await.unwrap();

    let results = tool_results(state.messages());
    let ids: Vec<_> = results.iter().map(|(id, ..)| id.as_str()).collect();
    assert_eq!(ids, ["call:a", "call:b", "call:c", "call:d"]);
    assert_eq!(results[0].1, "first");
    assert!(results[1].2);
    assert!(results[1].1.starts_with("Error: "));
    assert_eq!(
        results[2],
        ("call:c".to_owned(), "Error: boom".to_owned(), true)
    );
    assert_eq!(results[3].1, "last");
    assert_eq!(state.final_answer(), Some("Done."));
}

#[tokio::test]
async fn test_step_limit() {
    let model_provider = TestModelProvider::with_responder(|req| {
        let id = format!("call:{}", req.messages.len());
        PresetResponse::tool_call(id, "echo", json!({ "text": "again" }))
    });

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_max_steps(3)
        .with_tool(EchoTool)
        .build();
    let state = agent.invoke("1", "Loop forever").await.unwrap();

    assert_eq!(model_provider.requests().len(), 3);
    assert_eq!(tool_results(state.messages()).len(), 2);

    let last = state.last().and_then(ModelMessage::as_assistant).unwrap();
    assert_eq!(last.content, STEP_LIMIT_MESSAGE);
    assert_eq!(last.id, "msg:3");
    assert!(last.tool_calls.is_empty());
    assert_eq!(state.final_answer(), Some(STEP_LIMIT_MESSAGE));
}

#[tokio::test]
async fn test_answer_on_last_step() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::text("Right away."));

    let agent = AgentBuilder::with_model_provider(model_provider)
        .with_max_steps(1)
        .build();
    let state = agent.invoke("1", "Quick one").await.unwrap();
    assert_eq!(state.final_answer(), Some("Right away."));
}

#[tokio::test]
async fn test_threads_are_isolated() {
    let model_provider = TestModelProvider::with_responder(|req| {
        PresetResponse::text(format!("seen {} messages", req.messages.len()))
    });
    let checkpointer = Arc::new(MemoryCheckpointer::new());

    let agent = AgentBuilder::with_model_provider(model_provider)
        .with_checkpointer(checkpointer.clone())
        .build();
    agent.invoke("alice", "Hi").await.unwrap();
    let state = agent.invoke("alice", "Again").await.unwrap();
    assert_eq!(state.len(), 4);
    // system + 3 history messages
    assert_eq!(state.final_answer(), Some("seen 4 messages"));

    let state = agent.invoke("bob", "Hi").await.unwrap();
    assert_eq!(state.len(), 2);
    assert_eq!(state.final_answer(), Some("seen 2 messages"));

    let alice = checkpointer.get("alice").await.unwrap().unwrap();
    assert_eq!(alice.len(), 4);
    assert_eq!(agent.state("bob").await.unwrap().len(), 2);
    assert!(agent.state("carol").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_transient_failures() {
    let model_provider = TestModelProvider::default();
    model_provider
        .add_response(PresetResponse::text("Finally.").with_failures(2));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_max_retry_time(Duration::from_secs(30))
        .build();
    let state = agent.invoke("1", "Hello").await.unwrap();
    assert_eq!(state.final_answer(), Some("Finally."));
    assert_eq!(model_provider.requests().len(), 3);
}

#[tokio::test]
async fn test_permanent_failure() {
    let model_provider = TestModelProvider::default();

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .build();
    let err = match agent.invoke("1", "Hello").await {
        Err(AgentError::Model(err)) => err,
        other => panic!("expected a model error, got {other:?}"),
    };
    assert_eq!(err.kind(), ErrorKind::Other);
    assert_eq!(model_provider.requests().len(), 1);
}

#[tokio::test]
async fn test_same_thread_runs_are_serialized() {
    let mut model_provider = TestModelProvider::with_responder(|req| {
        PresetResponse::text(format!("seen {} messages", req.messages.len()))
    });
    model_provider.set_delay(Duration::from_millis(5));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .build();
    let (first, second) =
        tokio::join!(agent.invoke("1", "One"), agent.invoke("1", "Two"));
    first.unwrap();
    let second = second.unwrap();

    assert_eq!(second.len(), 4);
    let requests = model_provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages.len(), 2);
    assert_eq!(requests[1].messages.len(), 4);
    assert!(agent.thread_locks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_thread_locks_are_released() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::text("Hi."));

    let agent = AgentBuilder::with_model_provider(model_provider).build();
    agent.invoke("a", "Hello").await.unwrap();
    // The script is exhausted, so this run fails.
    agent.invoke("b", "Hello").await.unwrap_err();
    assert!(agent.thread_locks.lock().unwrap().is_empty());

    // A run dropped while waiting for the lock releases its handle too.
    let held = agent.thread_lock("c");
    let guard = held.lock.lock().await;
    let waiting = agent.invoke("c", "Hello");
    assert!(timeout(Duration::from_millis(10), waiting).await.is_err());
    assert_eq!(agent.thread_locks.lock().unwrap().len(), 1);
    drop(guard);
    drop(held);
    assert!(agent.thread_locks.lock().unwrap().is_empty());
}
