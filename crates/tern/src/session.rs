use std::sync::Arc;

use tern_core::checkpoint::{
    CheckpointError, Checkpointer, MemoryKind, open_checkpointer,
};
use tern_core::{Agent, AgentBuilder, AgentError, State};
use tern_model::ModelProvider;

use crate::config::Config;
use crate::tools::*;

/// The thread used when none is specified.
pub const DEFAULT_THREAD_ID: &str = "1";

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    config: Config,
    search_api_key: Option<String>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    thread_id: String,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        let agent_builder = AgentBuilder::with_model_provider(provider);
        Self {
            agent_builder,
            config: Config::default(),
            search_api_key: None,
            checkpointer: None,
            thread_id: DEFAULT_THREAD_ID.to_owned(),
        }
    }

    /// Applies the agent and tool settings of a configuration.
    ///
    /// The model settings are not used here, they belong to the provider.
    #[inline]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Enables the web search tool with a Tavily API key.
    #[inline]
    pub fn with_search_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.search_api_key = Some(api_key.into());
        self
    }

    /// Uses a specific checkpoint store instead of the one selected by the
    /// configuration.
    #[inline]
    pub fn with_checkpointer(
        mut self,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Sets the conversation thread of this session.
    #[inline]
    pub fn with_thread_id<S: Into<String>>(mut self, thread_id: S) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    /// Builds a new session.
    ///
    /// Fails if the configuration asks for a memory kind that is not
    /// available.
    pub fn build(self) -> Result<Session, CheckpointError> {
        let Self {
            agent_builder,
            config,
            search_api_key,
            checkpointer,
            thread_id,
        } = self;

        let checkpointer = match checkpointer {
            Some(checkpointer) => checkpointer,
            None => {
                let kind = if config.long_term_memory {
                    MemoryKind::LongTerm
                } else {
                    MemoryKind::ShortTerm
                };
                open_checkpointer(kind)?
            }
        };

        let mut agent_builder = agent_builder
            .with_system_prompt(config.system_prompt)
            .with_max_steps(config.max_steps)
            .with_checkpointer(checkpointer)
            .with_tool(TimeTool::new());
        match search_api_key {
            Some(api_key) => {
                agent_builder = agent_builder.with_tool(
                    SearchTool::new(api_key)
                        .with_max_results(config.max_search_results),
                );
            }
            None => warn!("no search API key, web search is disabled"),
        }

        Ok(Session {
            agent: agent_builder.build(),
            thread_id,
        })
    }
}

/// A chat session on one conversation thread.
///
/// The session holds a fully configured agent that you can use directly, and it
/// is basically a wrapper around [`Agent`].
pub struct Session {
    agent: Agent,
    thread_id: String,
}

impl Session {
    /// Sends a message to the session, and returns the final answer.
    pub async fn send_message(
        &self,
        message: &str,
    ) -> Result<String, AgentError> {
        let state = self.agent.invoke(&self.thread_id, message).await?;
        Ok(state.final_answer().unwrap_or_default().to_owned())
    }

    /// Returns the messages of this session so far.
    #[inline]
    pub async fn history(&self) -> Result<State, AgentError> {
        self.agent.state(&self.thread_id).await
    }

    /// Returns the conversation thread of this session.
    #[inline]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Returns the underlying agent.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}
