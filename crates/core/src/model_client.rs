use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::future::retry_notify;
use tern_model::{
    AssistantMessage, ModelProvider, ModelRequest, ModelResponse,
    ModelResponseEvent,
};
use tracing::Instrument;

use crate::error::ModelError;

type SendRequestResult = Result<AssistantMessage, ModelError>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type HandlerFn =
    Arc<dyn Fn(ModelRequest) -> BoxedSendRequestFuture + Send + Sync>;

/// The default time window in which transient failures are retried.
pub(crate) const DEFAULT_MAX_RETRY_TIME: Duration = Duration::from_secs(60);

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    max_retry_time: Duration,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self {
            handler_fn,
            max_retry_time: DEFAULT_MAX_RETRY_TIME,
        }
    }

    #[inline]
    pub fn set_max_retry_time(&mut self, max_retry_time: Duration) {
        self.max_retry_time = max_retry_time;
    }

    /// Sends a request and collects the complete assistant message.
    ///
    /// Transient failures are retried with exponential backoff until the
    /// retry window elapses, the last error is returned then.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    pub async fn send_request(&self, req: ModelRequest) -> SendRequestResult {
        let backoff = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(self.max_retry_time))
            .build();
        retry_notify(
            backoff,
            || {
                let fut = (self.handler_fn)(req.clone());
                async move {
                    fut.await.map_err(|err| {
                        if err.kind().is_transient() {
                            backoff::Error::transient(err)
                        } else {
                            backoff::Error::permanent(err)
                        }
                    })
                }
            },
            |err: ModelError, delay: Duration| {
                warn!("model request failed, retrying in {delay:?}: {err}");
            },
        )
        .await
    }
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(ModelError::from_provider(&err));
        }
    };

    let mut msg = AssistantMessage::default();
    let mut reasoning = String::new();

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(ModelError::from_provider(&err));
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(delta) => {
                msg.content.push_str(&delta);
            }
            ModelResponseEvent::ReasoningDelta(delta) => {
                reasoning.push_str(&delta);
            }
            ModelResponseEvent::ToolCall(req) => {
                msg.tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                debug!("model finished: {reason:?}");
            }
        }
    }

    // The identifier is only reliable once all events are received.
    msg.id = pinned_resp.message_id().unwrap_or_else(next_local_id);
    if !reasoning.is_empty() {
        msg.reasoning = Some(reasoning);
    }

    trace!("finished a request");
    Ok(msg)
}

fn next_local_id() -> String {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    format!("local:{}", NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use tern_model::{ErrorKind, ModelMessage};
    use tern_test_model::{PresetEvent, PresetResponse, TestModelProvider};

    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::user("Hi")],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let model_provider = TestModelProvider::default();
        for _ in 0..3 {
            model_provider.add_response(PresetResponse::with_events([
                PresetEvent::MessageDelta("How ".to_owned()),
                PresetEvent::MessageDelta("are ".to_owned()),
                PresetEvent::MessageDelta("you?".to_owned()),
            ]));
        }

        let model_client = ModelClient::new(model_provider);
        for i in 1..=3 {
            let msg = model_client.send_request(request()).await.unwrap();
            assert_eq!(msg.content, "How are you?");
            assert_eq!(msg.id, format!("msg:{i}"));
            assert!(msg.tool_calls.is_empty());
            assert_eq!(msg.reasoning, None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_errors() {
        let model_provider = TestModelProvider::default();
        model_provider.add_response(PresetResponse::text("ok").with_failures(2));

        let model_client = ModelClient::new(model_provider.clone());
        let msg = model_client.send_request(request()).await.unwrap();
        assert_eq!(msg.content, "ok");
        assert_eq!(model_provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_error_handling() {
        let model_provider = TestModelProvider::default();
        let model_client = ModelClient::new(model_provider.clone());
        let err = model_client.send_request(request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        // Permanent errors are never retried.
        assert_eq!(model_provider.requests().len(), 1);
    }
}
