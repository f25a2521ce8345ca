use std::collections::BTreeMap;
use std::future::ready;
use std::pin::Pin;

use futures_util::future::join_all;
use tern_model::{ModelTool, ToolCallRequest, ToolCallResult};
use tracing::Instrument;

use crate::tool::{Error, ToolObject, ToolResult};

type BoxedToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// An executor that handles tool call requests from the model.
pub struct Executor {
    tools: BTreeMap<String, Box<dyn ToolObject>>,
}

impl Executor {
    pub fn with_tools(tools: Vec<Box<dyn ToolObject>>) -> Self {
        let tools = tools
            .into_iter()
            .map(|tool| (tool.name().to_owned(), tool))
            .collect();
        Self { tools }
    }

    /// Returns the definitions of all tools, ordered by name.
    #[inline]
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    /// Runs all requests concurrently.
    ///
    /// Exactly one result is returned per request, in request order, and
    /// each result carries the identifier of its request. Failures become
    /// error results instead of being dropped.
    pub async fn execute_all(
        &self,
        requests: &[ToolCallRequest],
    ) -> Vec<ToolCallResult> {
        let calls = requests.iter().map(|req| {
            let span =
                debug_span!("tool execute", id = %req.id, name = %req.name);
            let fut = self.spawn(req);
            let (id, name) = (req.id.clone(), req.name.clone());
            async move { make_result(id, name, fut.await) }.instrument(span)
        });
        join_all(calls).await
    }

    fn spawn(&self, req: &ToolCallRequest) -> BoxedToolFuture {
        let Some(tool) = self.tools.get(&req.name) else {
            warn!("tool not found: {}", req.name);
            let reason = format!("there is no tool named `{}`", req.name);
            return Box::pin(ready(Err(Error::not_found().with_reason(reason))));
        };
        trace!("spawning a tool ({}) with args: {}", req.id, req.arguments);
        tool.execute(req.arguments.clone())
    }
}

fn make_result(id: String, name: String, result: ToolResult) -> ToolCallResult {
    match result {
        Ok(content) => ToolCallResult {
            id,
            name,
            content,
            is_error: false,
        },
        Err(err) => {
            debug!("tool `{name}` failed: {err}");
            ToolCallResult {
                id,
                name,
                content: format!("Error: {}", err.reason()),
                is_error: true,
            }
        }
    }
}
