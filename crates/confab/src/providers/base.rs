use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};

/// Information about token usage for a completion
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// One entry in the exchange held with a model provider.
///
/// Richer than a transcript [`Message`]: an assistant entry may carry tool
/// calls, and a tool entry answers one of them by id. Converted to the
/// wire format in [`super::utils`], never sent as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user<C: Into<String>>(content: C) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant<C: Into<String>>(content: C) -> Self {
        ChatMessage {
            role: "assistant".to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// The answer to a tool call, routed back by the call's id.
    pub fn tool<I: Into<String>, C: Into<String>>(tool_call_id: I, content: C) -> Self {
        ChatMessage {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        ChatMessage {
            role: message.role.clone(),
            content: Some(message.content.clone()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Base trait for model providers
#[async_trait]
pub trait Provider {
    /// Generate the next turn of the exchange. An empty `system` string
    /// means no system message is sent.
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<(ChatMessage, Usage)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_creation() {
        let usage = Usage::new(Some(10), Some(5), Some(15));
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(5));
        assert_eq!(usage.total_tokens, Some(15));

        assert_eq!(Usage::default(), Usage::new(None, None, None));
    }

    #[test]
    fn test_chat_message_constructors() {
        let message = ChatMessage::user("hi");
        assert_eq!(message.role, "user");
        assert_eq!(message.text(), "hi");

        let message = ChatMessage::tool("call_1", "{}");
        assert_eq!(message.role, "tool");
        assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_chat_message_from_transcript_message() {
        let message = ChatMessage::from(&Message::new("alice", "hello"));
        assert_eq!(message.role, "alice");
        assert_eq!(message.content.as_deref(), Some("hello"));
        assert!(message.tool_calls.is_empty());
    }
}
