//! Context builder: assembles the message list for one turn.

use agentmesh_core::types::{Message, ToolCall};
use tracing::debug;

/// Builds the per-turn conversation from the inbound history.
#[derive(Clone, Debug)]
pub struct ContextBuilder {
    system_prompt: String,
}

impl ContextBuilder {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// System prompt first, then the inbound history in order.
    ///
    /// An empty system prompt is omitted.
    pub fn build_messages(&self, history: &[Message]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !self.system_prompt.trim().is_empty() {
            messages.push(Message::system(&self.system_prompt));
        }
        messages.extend_from_slice(history);
        debug!(messages = messages.len(), "built turn context");
        messages
    }

    /// Add a tool result message.
    pub fn add_tool_result(messages: &mut Vec<Message>, tool_call_id: &str, result: &str) {
        messages.push(Message::tool_result(tool_call_id, result));
    }

    /// Add the assistant's reply. Text is kept alongside any tool calls.
    pub fn add_assistant_message(
        messages: &mut Vec<Message>,
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) {
        if tool_calls.is_empty() {
            if let Some(text) = content {
                messages.push(Message::assistant(text));
            }
        } else {
            messages.push(Message::assistant_tool_calls(content, tool_calls));
        }
    }
}
