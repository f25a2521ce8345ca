//! A local fake model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tern_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    id: String,
    events: VecDeque<ModelResponseEvent>,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl TestModelResponse {
    fn new(id: String, preset: PresetResponse, delay: Duration) -> Self {
        let finish_reason = if preset.has_tool_calls() {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        };
        let events = preset
            .events
            .into_iter()
            .map(|event| match event {
                PresetEvent::MessageDelta(msg) => {
                    ModelResponseEvent::MessageDelta(msg)
                }
                PresetEvent::ToolCall(req) => ModelResponseEvent::ToolCall(req),
            })
            .chain([ModelResponseEvent::Completed(finish_reason)])
            .collect();
        Self {
            id,
            events,
            delay,
            sleep: None,
        }
    }
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;
            return Poll::Ready(Ok(this.events.pop_front()));
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }

    fn message_id(&self) -> Option<String> {
        Some(self.id.clone())
    }
}

type Responder = Arc<dyn Fn(&ModelRequest) -> PresetResponse + Send + Sync>;

#[derive(Default)]
struct Script {
    responses: VecDeque<PresetResponse>,
    responder: Option<Responder>,
    requests: Vec<ModelRequest>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the script, which is how the
/// model should respond. Each request consumes the next queued response;
/// once the queue is empty, the responder (if any) decides the response
/// from the request. If neither is available, an error is returned.
///
/// Clones share the same script, so a test can keep a clone to inspect the
/// requests after handing the provider over to an agent.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

impl TestModelProvider {
    /// Creates a provider that computes every response from the request.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&ModelRequest) -> PresetResponse + Send + Sync + 'static,
    {
        let provider = Self::default();
        provider.lock().responder = Some(Arc::new(responder));
        provider
    }

    /// Queues a response.
    #[inline]
    pub fn add_response(&self, preset: PresetResponse) {
        self.lock().responses.push_back(preset);
    }

    /// Sets the delay between two events.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all requests received so far, including failed ones.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_response(&self, req: &ModelRequest) -> Result<PresetResponse, Error> {
        let mut script = self.lock();
        script.requests.push(req.clone());

        if let Some(front) = script.responses.front_mut()
            && let Some(failures) = front.failures
        {
            // `Some(0)` fails forever, otherwise count down to a success.
            if failures > 0 {
                front.failures = (failures > 1).then(|| failures - 1);
            }
            return Err(Error {
                message: "preset failure",
                kind: ErrorKind::RateLimitExceeded,
            });
        }
        if let Some(preset) = script.responses.pop_front() {
            return Ok(preset);
        }
        match &script.responder {
            Some(responder) => Ok(responder(req)),
            None => Err(Error {
                message: "no enough steps",
                kind: ErrorKind::Other,
            }),
        }
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let result = self.next_response(req).map(|preset| {
            let id = format!("msg:{}", self.lock().requests.len());
            let delay = self.delay.unwrap_or(Duration::from_millis(1));
            TestModelResponse::new(id, preset, delay)
        });
        std::future::ready(result)
    }
}
