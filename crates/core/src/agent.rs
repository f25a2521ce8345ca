mod builder;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Local;
use tern_model::{AssistantMessage, ModelMessage, ModelRequest};
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::checkpoint::Checkpointer;
use crate::error::AgentError;
use crate::model_client::ModelClient;
use crate::prompt::render_system_prompt;
use crate::routing::{Route, route_model_output};
use crate::state::State;
use crate::tool::Executor as ToolExecutor;
pub use builder::{AgentBuilder, DEFAULT_MAX_STEPS};

type ThreadLocks = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// The reply that replaces tool requests made on the last allowed step.
pub const STEP_LIMIT_MESSAGE: &str =
    "Sorry, I could not find an answer to your question in the specified number of steps.";

/// An agent instance, which owns a model client, the registered tools and
/// a checkpoint store for conversation threads.
///
/// Each call to [`Agent::invoke`] is one run: it restores the thread,
/// appends the user input and alternates between the model and the tools
/// until the model gives an answer or the step budget is spent. Runs on
/// the same thread are serialized, runs on different threads are not.
pub struct Agent {
    model_client: ModelClient,
    tool_executor: ToolExecutor,
    system_prompt: String,
    max_steps: usize,
    checkpointer: Arc<dyn Checkpointer>,
    thread_locks: ThreadLocks,
}

/// A handle to the run lock of a thread.
///
/// The lock stays registered while any run holds or waits for it, and is
/// unregistered when the last handle is dropped, cancelled runs included.
struct ThreadLock<'a> {
    locks: &'a ThreadLocks,
    thread_id: &'a str,
    lock: Arc<Mutex<()>>,
}

impl Drop for ThreadLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map and this handle are left.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(self.thread_id);
        }
    }
}

impl Agent {
    fn from_builder(builder: AgentBuilder) -> Self {
        let AgentBuilder {
            mut model_client,
            system_prompt,
            max_steps,
            checkpointer,
            tools,
            max_retry_time,
        } = builder;
        model_client.set_max_retry_time(max_retry_time);

        Self {
            model_client,
            tool_executor: ToolExecutor::with_tools(tools),
            system_prompt,
            max_steps,
            checkpointer,
            thread_locks: Default::default(),
        }
    }

    /// Runs the agent on a thread with a new user input, and returns the
    /// state of the thread when the run terminates.
    ///
    /// The final message of the returned state is an assistant message
    /// without tool calls, see [`State::final_answer`].
    pub async fn invoke(
        &self,
        thread_id: &str,
        input: impl Into<String>,
    ) -> Result<State, AgentError> {
        let thread_lock = self.thread_lock(thread_id);
        let _guard = thread_lock.lock.lock().await;

        let input = input.into();
        self.run(thread_id, input)
            .instrument(info_span!("run", thread_id))
            .await
    }

    /// Returns the checkpointed state of a thread.
    pub async fn state(&self, thread_id: &str) -> Result<State, AgentError> {
        let state = self.checkpointer.get(thread_id).await?;
        Ok(state.unwrap_or_default())
    }

    /// Returns the maximum number of model invocations per run.
    #[inline]
    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    fn thread_lock<'a>(&'a self, thread_id: &'a str) -> ThreadLock<'a> {
        let mut locks =
            self.thread_locks.lock().unwrap_or_else(|e| e.into_inner());
        let lock = Arc::clone(locks.entry(thread_id.to_owned()).or_default());
        ThreadLock {
            locks: &self.thread_locks,
            thread_id,
            lock,
        }
    }

    async fn run(
        &self,
        thread_id: &str,
        input: String,
    ) -> Result<State, AgentError> {
        let mut state =
            self.checkpointer.get(thread_id).await?.unwrap_or_default();
        debug!("restored {} messages", state.len());
        state.push(ModelMessage::user(input));

        let mut step = 0;
        loop {
            step += 1;
            let is_last_step = step >= self.max_steps;

            let msg = self.call_model(&state, is_last_step).await?;
            state.push(ModelMessage::Assistant(msg));
            self.checkpointer.put(thread_id, state.clone()).await?;

            match route_model_output(state.messages()) {
                Route::End => {
                    info!("run finished after {step} step(s)");
                    return Ok(state);
                }
                Route::Tools => {
                    let results = self
                        .tool_executor
                        .execute_all(state.pending_tool_calls())
                        .await;
                    for result in results {
                        state.push(ModelMessage::Tool(result));
                    }
                    self.checkpointer.put(thread_id, state.clone()).await?;
                }
            }
        }
    }

    async fn call_model(
        &self,
        state: &State,
        is_last_step: bool,
    ) -> Result<AssistantMessage, AgentError> {
        let system_prompt =
            render_system_prompt(&self.system_prompt, &Local::now());
        let messages = [ModelMessage::system(system_prompt)]
            .into_iter()
            .chain(state.messages().iter().cloned())
            .collect();
        let req = ModelRequest {
            messages,
            tools: self.tool_executor.definitions(),
        };

        let msg = self.model_client.send_request(req).await?;
        if is_last_step && msg.has_tool_calls() {
            warn!(
                "step budget exhausted with {} pending tool call(s)",
                msg.tool_calls.len()
            );
            return Ok(AssistantMessage {
                id: msg.id,
                content: STEP_LIMIT_MESSAGE.to_owned(),
                reasoning: None,
                tool_calls: vec![],
            });
        }
        Ok(msg)
    }
}
