use std::sync::Arc;
use std::time::Duration;

use tern_model::ModelProvider;

use super::Agent;
use crate::checkpoint::{Checkpointer, MemoryCheckpointer};
use crate::model_client::{DEFAULT_MAX_RETRY_TIME, ModelClient};
use crate::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::tool::{AnyTool, Tool, ToolObject};

/// The default maximum number of model invocations per run.
pub const DEFAULT_MAX_STEPS: usize = 25;

/// [`Agent`] builder.
pub struct AgentBuilder {
    pub(crate) model_client: ModelClient,
    pub(crate) system_prompt: String,
    pub(crate) max_steps: usize,
    pub(crate) checkpointer: Arc<dyn Checkpointer>,
    pub(crate) tools: Vec<Box<dyn ToolObject>>,
    pub(crate) max_retry_time: Duration,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            max_steps: DEFAULT_MAX_STEPS,
            checkpointer: Arc::new(MemoryCheckpointer::new()),
            tools: vec![],
            max_retry_time: DEFAULT_MAX_RETRY_TIME,
        }
    }

    /// Sets the system prompt template.
    ///
    /// Occurrences of `{system_time}` are replaced by the current local time
    /// on every model invocation.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, template: S) -> Self {
        self.system_prompt = template.into();
        self
    }

    /// Sets the maximum number of model invocations per run, at least 1.
    #[inline]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Sets the store where thread states are checkpointed.
    #[inline]
    pub fn with_checkpointer(
        mut self,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        self.checkpointer = checkpointer;
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        let tool = Box::new(AnyTool(tool));
        self.tools.push(tool);
        self
    }

    /// Sets how long transient model failures are retried.
    #[inline]
    pub fn with_max_retry_time(mut self, max_retry_time: Duration) -> Self {
        self.max_retry_time = max_retry_time;
        self
    }

    /// Builds the agent.
    #[inline]
    pub fn build(self) -> Agent {
        Agent::from_builder(self)
    }
}
