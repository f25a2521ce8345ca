//! A set of built-in tools that models can use.

mod search;
mod time;

pub use search::{DEFAULT_MAX_RESULTS, SearchTool, TAVILY_SEARCH_URL};
pub use time::{TimeError, TimeTool, current_time};
