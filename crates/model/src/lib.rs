//! An abstraction layer for different LLMs.
//!
//! This crate establishes an unified protocol for the agent to talk to
//! chat-completion models, so that the agent loop can switch between
//! providers without modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to. Messages form a
//! closed set of roles (see [`ModelMessage`]), which is also the shape of
//! the conversation state kept by the agent.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
