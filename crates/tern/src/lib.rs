//! An out-of-the-box agent that answers questions with web search and time
//! lookup tools.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring agent functionality into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod config;
mod session;
pub mod tools;

pub use config::{Config, ConfigError, ModelConfig, load_api_key};
pub use session::{DEFAULT_THREAD_ID, Session, SessionBuilder};

/// Re-exports of [`tern_core`] crate.
pub mod core {
    pub use tern_core::*;
}
