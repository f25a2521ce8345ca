//! Core logic including the agent loop, conversation state, tool execution
//! and checkpointing.
//!
//! The agent is a two-node graph. The model node asks the model for the
//! next assistant message, and the tool node runs the tool calls that
//! message requests. After each model response, [`route_model_output`]
//! decides whether the run goes on to the tool node or terminates. The tool
//! node always hands control back to the model node.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod checkpoint;
mod error;
mod model_client;
mod prompt;
mod routing;
mod state;
pub mod tool;

pub use agent::{Agent, AgentBuilder, DEFAULT_MAX_STEPS, STEP_LIMIT_MESSAGE};
pub use error::{AgentError, ModelError};
pub use prompt::{DEFAULT_SYSTEM_PROMPT, render_system_prompt};
pub use routing::{Route, route_model_output};
pub use state::State;
