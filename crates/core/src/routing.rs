use tern_model::ModelMessage;

/// Where the run goes after the model node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    /// The run is over.
    End,
    /// Execute the requested tool calls, then call the model again.
    Tools,
}

/// Decides the next node from the output of the model node.
///
/// # Panics
///
/// Panics if `messages` is empty or the last message is not authored by
/// the assistant. The model node always appends an assistant message right
/// before this is called, so either case means the state was built wrong.
pub fn route_model_output(messages: &[ModelMessage]) -> Route {
    let Some(last_message) = messages.last() else {
        panic!("expected an assistant message in output edges, but got none");
    };
    match last_message {
        ModelMessage::Assistant(msg) if msg.has_tool_calls() => Route::Tools,
        ModelMessage::Assistant(_) => Route::End,
        ModelMessage::System { .. } => {
            panic!("expected an assistant message in output edges, but got a system message")
        }
        ModelMessage::User { .. } => {
            panic!("expected an assistant message in output edges, but got a user message")
        }
        ModelMessage::Tool(_) => {
            panic!("expected an assistant message in output edges, but got a tool message")
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tern_model::{AssistantMessage, ToolCallRequest, ToolCallResult};

    use super::*;

    fn assistant_with_calls(n: usize) -> ModelMessage {
        ModelMessage::Assistant(AssistantMessage {
            id: "msg:1".to_owned(),
            content: "Let me check.".to_owned(),
            reasoning: None,
            tool_calls: (0..n)
                .map(|i| ToolCallRequest {
                    id: format!("call:{i}"),
                    name: "get_current_time".to_owned(),
                    arguments: json!({ "region": "UTC" }),
                })
                .collect(),
        })
    }

    #[test]
    fn test_terminates_without_tool_calls() {
        let messages = vec![ModelMessage::user("Hi"), assistant_with_calls(0)];
        assert_eq!(route_model_output(&messages), Route::End);
    }

    #[test]
    fn test_routes_to_tools() {
        for n in 1..4 {
            let messages =
                vec![ModelMessage::user("Time?"), assistant_with_calls(n)];
            assert_eq!(route_model_output(&messages), Route::Tools);
        }
    }

    #[test]
    fn test_only_last_message_counts() {
        let messages = vec![
            ModelMessage::user("Time?"),
            assistant_with_calls(1),
            ModelMessage::Tool(ToolCallResult {
                id: "call:0".to_owned(),
                name: "get_current_time".to_owned(),
                content: "2025-01-01T00:00:00+00:00".to_owned(),
                is_error: false,
            }),
            assistant_with_calls(0),
        ];
        assert_eq!(route_model_output(&messages), Route::End);
    }

    #[test]
    #[should_panic(expected = "got a user message")]
    fn test_panics_on_user_message() {
        route_model_output(&[ModelMessage::user("Hi")]);
    }

    #[test]
    #[should_panic(expected = "got none")]
    fn test_panics_on_empty_state() {
        route_model_output(&[]);
    }
}
