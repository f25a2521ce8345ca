use chrono::Utc;
use chrono_tz::Tz;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use tern_core::tool::{Error as ToolError, Tool, ToolResult};
use thiserror::Error;

/// Errors from looking up the time of a region.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TimeError {
    /// The region is not a known IANA timezone name.
    #[error("unknown region `{0}`, expected an IANA timezone name like `Asia/Tokyo`")]
    InvalidRegion(String),
}

#[derive(Deserialize, JsonSchema)]
pub struct TimeToolParameters {
    #[schemars(
        description = "IANA timezone name of the region, e.g. `UTC` or `Europe/Paris`."
    )]
    region: String,
}

/// A tool for getting the current time of a region.
pub struct TimeTool {
    parameter_schema: Value,
}

impl TimeTool {
    /// Creates a new time tool.
    #[inline]
    pub fn new() -> Self {
        TimeTool {
            parameter_schema: schema_for!(TimeToolParameters).to_value(),
        }
    }
}

impl Default for TimeTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for TimeTool {
    type Input = TimeToolParameters;

    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current time in the specified region."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: TimeToolParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        async move {
            current_time(&input.region).map_err(|err| {
                ToolError::invalid_input().with_reason(err.to_string())
            })
        }
    }
}

/// Returns the current time of a region in RFC 3339 format.
///
/// The region is matched against IANA timezone names, ignoring case.
pub fn current_time(region: &str) -> Result<String, TimeError> {
    let region = region.trim();
    let tz = region
        .parse::<Tz>()
        .or_else(|_| Tz::from_str_insensitive(region))
        .map_err(|_| TimeError::InvalidRegion(region.to_owned()))?;
    Ok(Utc::now().with_timezone(&tz).to_rfc3339())
}
