use std::fmt::Display;

use chrono::{DateTime, SecondsFormat, TimeZone};

/// The system prompt used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant.\n\nSystem time: {system_time}";

/// Renders a system prompt template, substituting every `{system_time}`
/// placeholder with `now` in RFC 3339 format.
///
/// Other braces are left untouched.
pub fn render_system_prompt<Tz>(template: &str, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    template.replace(
        "{system_time}",
        &now.to_rfc3339_opts(SecondsFormat::Secs, false),
    )
}
