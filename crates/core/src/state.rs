//! Conversation state.

use serde::{Deserialize, Serialize};
use tern_model::{ModelMessage, ToolCallRequest};

/// The accumulated messages of one conversation thread.
///
/// Messages are kept in chronological order and are replayed verbatim to
/// the model on every invocation. The log is append-only: once a message is
/// in, it is never changed or removed, and only the agent loop appends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    messages: Vec<ModelMessage>,
}

impl State {
    /// Returns all messages in order.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    /// Returns the most recent message.
    #[inline]
    pub fn last(&self) -> Option<&ModelMessage> {
        self.messages.last()
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if no message has been recorded yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the content of the final assistant message, if the
    /// conversation currently ends with one that requests no tools.
    pub fn final_answer(&self) -> Option<&str> {
        self.last()
            .and_then(ModelMessage::as_assistant)
            .filter(|msg| !msg.has_tool_calls())
            .map(|msg| msg.content.as_str())
    }

    /// Returns the tool calls requested by the last message.
    pub(crate) fn pending_tool_calls(&self) -> &[ToolCallRequest] {
        match self.last() {
            Some(ModelMessage::Assistant(msg)) => &msg.tool_calls,
            _ => &[],
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, msg: ModelMessage) {
        self.messages.push(msg);
    }
}
