use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use serde_json::Value;
use tern_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, ErrorBody, ToolCall};

struct PartialState {
    sse: Sse,
    id: Option<String>,
    tool_calls: Vec<ToolCall>,
    // Events decoded from the stream but not yet handed to the caller. One
    // chunk may produce several events, e.g. text followed by the finish
    // reason.
    pending_events: VecDeque<ModelResponseEvent>,
    // Set once the finish reason has been queued. Tool calls are only
    // complete at that point, since their arguments arrive in fragments.
    completed: bool,
    finished: bool,
}

impl PartialState {
    fn complete(&mut self, finish_reason: Option<&str>) {
        if self.completed {
            return;
        }
        self.completed = true;

        for tool_call in self.tool_calls.drain(..) {
            self.pending_events
                .push_back(ModelResponseEvent::ToolCall(finish_tool_call(
                    tool_call,
                )));
        }
        let has_tool_calls = self
            .pending_events
            .iter()
            .any(|e| matches!(e, ModelResponseEvent::ToolCall(_)));
        let finish_reason = match finish_reason {
            Some("tool_calls") => ModelFinishReason::ToolCalls,
            Some("length") => ModelFinishReason::Length,
            _ if has_tool_calls => ModelFinishReason::ToolCalls,
            _ => ModelFinishReason::Stop,
        };
        self.pending_events
            .push_back(ModelResponseEvent::Completed(finish_reason));
    }

    fn merge_tool_call(&mut self, tool_call: ToolCall) {
        let existing = self.tool_calls.iter_mut().find(|t| match tool_call.index {
            Some(_) => t.index == tool_call.index,
            None => tool_call.id.is_some() && t.id == tool_call.id,
        });
        let Some(partial) = existing else {
            self.tool_calls.push(tool_call);
            return;
        };

        // Patch the partial tool call. Some servers repeat the id and name
        // in every delta, only the arguments arrive in fragments.
        if let Some(id) = tool_call.id {
            partial.id.get_or_insert(id);
        }
        if let Some(ty) = tool_call.r#type {
            partial.r#type = Some(ty);
        }
        let Some(function) = tool_call.function else {
            return;
        };
        let partial_func = partial.function.get_or_insert_default();
        if let Some(name) = function.name {
            partial_func.name.get_or_insert(name);
        }
        if let Some(arguments) = function.arguments {
            partial_func
                .arguments
                .get_or_insert_default()
                .push_str(&arguments);
        }
    }
}

fn finish_tool_call(tool_call: ToolCall) -> ToolCallRequest {
    let function = tool_call.function.unwrap_or_default();
    let name = function.name.unwrap_or_default();
    let raw_arguments = function.arguments.unwrap_or_default();
    let arguments = if raw_arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&raw_arguments).unwrap_or_else(|err| {
            warn!("malformed arguments for tool `{name}`: {err}");
            Value::Null
        })
    };
    ToolCallRequest {
        id: tool_call.id.unwrap_or_default(),
        name,
        arguments,
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
        message_id: Option<String>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            tool_calls: Default::default(),
            pending_events: Default::default(),
            completed: false,
            finished: false,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
            message_id: None,
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, partial_state)) => {
                    *this.next_event_fut = None;
                    *this.message_id = partial_state.id;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };
        if this.message_id.is_none() {
            this.message_id.clone_from(&partial_state.id);
        }

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }

    fn message_id(&self) -> Option<String> {
        self.message_id.clone()
    }
}

async fn next_event(mut partial_state: PartialState) -> NextEvent {
    loop {
        if let Some(event) = partial_state.pending_events.pop_front() {
            return Ok((Some(event), partial_state));
        }
        if partial_state.finished {
            return Ok((None, partial_state));
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                // Some servers close the stream without `[DONE]`.
                partial_state.complete(None);
                partial_state.finished = true;
                continue;
            }
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Unavailable));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            partial_state.complete(None);
            partial_state.finished = true;
            continue;
        }

        let mut chunk = match serde_json::from_str::<ChatCompletionChunk>(&sse_event)
        {
            Ok(chunk) => chunk,
            Err(err) => {
                if let Ok(body) = serde_json::from_str::<ErrorBody>(&sse_event) {
                    return Err(Error::new(body.error.message, ErrorKind::Other));
                }
                return Err(Error::new(format!("{err}"), ErrorKind::Other));
            }
        };
        if partial_state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id
        {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        };
        if let Some(usage) = chunk.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "token usage"
            );
        }

        let Some(choice) = chunk.choices.pop() else {
            continue;
        };

        let delta = choice.delta;
        if let Some(reasoning) =
            delta.reasoning_content.filter(|s| !s.is_empty())
        {
            partial_state
                .pending_events
                .push_back(ModelResponseEvent::ReasoningDelta(reasoning));
        }
        if let Some(content) = delta.content.filter(|s| !s.is_empty()) {
            partial_state
                .pending_events
                .push_back(ModelResponseEvent::MessageDelta(content));
        }
        for tool_call in delta.tool_calls.into_iter().flatten() {
            partial_state.merge_tool_call(tool_call);
        }
        if let Some(finish_reason) = choice.finish_reason {
            partial_state.complete(Some(&finish_reason));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::io::Chunks;

    async fn collect_events(
        fixture: &'static [u8],
        split_at: usize,
    ) -> (Vec<ModelResponseEvent>, Option<String>) {
        let (head, tail) = fixture.split_at(split_at);
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(head), Bytes::from_static(tail)].into(),
        );
        let mut resp = pin!(OpenAIResponse::from_sse(Sse::new(chunks)));
        let mut events = vec![];
        while let Some(event) = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap()
        {
            events.push(event);
        }
        (events, resp.message_id())
    }

    #[tokio::test]
    async fn test_tool_call_events() {
        let (events, message_id) = collect_events(
            include_bytes!("../fixtures/tool_call_response.txt"),
            301,
        )
        .await;

        assert_eq!(message_id.as_deref(), Some("chatcmpl-42"));
        assert_eq!(
            events,
            vec![
                ModelResponseEvent::MessageDelta("Let me check.".to_owned()),
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_0".to_owned(),
                    name: "get_current_time".to_owned(),
                    arguments: json!({ "region": "UTC" }),
                }),
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_1".to_owned(),
                    name: "tavily_search".to_owned(),
                    arguments: json!({ "query": "world clock" }),
                }),
                ModelResponseEvent::Completed(ModelFinishReason::ToolCalls),
            ]
        );
    }

    #[tokio::test]
    async fn test_text_events() {
        let (events, message_id) = collect_events(
            include_bytes!("../fixtures/text_response.txt"),
            64,
        )
        .await;

        assert_eq!(message_id.as_deref(), Some("chatcmpl-7"));
        assert_eq!(
            events,
            vec![
                ModelResponseEvent::ReasoningDelta(
                    "The tool said midnight.".to_owned()
                ),
                ModelResponseEvent::MessageDelta("It is ".to_owned()),
                ModelResponseEvent::MessageDelta(
                    "midnight in UTC.".to_owned()
                ),
                ModelResponseEvent::Completed(ModelFinishReason::Stop),
            ]
        );
    }

    #[tokio::test]
    async fn test_error_payload() {
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(
                b"data: {\"error\":{\"message\":\"Insufficient Balance\"}}\n\n",
            )]
            .into(),
        );
        let mut resp = pin!(OpenAIResponse::from_sse(Sse::new(chunks)));
        let err = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "Insufficient Balance");
    }

    #[tokio::test]
    async fn test_repeated_tool_call_id() {
        let chunks = Chunks::from_vec_deque(
            vec![
                Bytes::from_static(
                    br#"data: {"id":"chatcmpl-9","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_0","type":"function","function":{"name":"get_current_time","arguments":"{\"region\":"}}]},"finish_reason":null}]}

"#,
                ),
                Bytes::from_static(
                    br#"data: {"id":"chatcmpl-9","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_0","function":{"name":"get_current_time","arguments":"\"UTC\"}"}}]},"finish_reason":"tool_calls"}]}

data: [DONE]

"#,
                ),
            ]
            .into(),
        );
        let mut resp = pin!(OpenAIResponse::from_sse(Sse::new(chunks)));
        let mut events = vec![];
        while let Some(event) = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap()
        {
            events.push(event);
        }

        assert_eq!(
            events,
            vec![
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_0".to_owned(),
                    name: "get_current_time".to_owned(),
                    arguments: json!({ "region": "UTC" }),
                }),
                ModelResponseEvent::Completed(ModelFinishReason::ToolCalls),
            ]
        );
    }
}
