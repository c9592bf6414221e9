use std::collections::HashSet;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use super::base::ChatMessage;
use crate::models::tool::{Tool, ToolCall};

/// Convert an exchange into the chat completions message format.
pub fn messages_to_openai_spec(messages: &[ChatMessage]) -> Vec<Value> {
    let mut payload = Vec::new();
    for message in messages {
        let mut converted = json!({ "role": message.role });
        if let Some(content) = &message.content {
            converted["content"] = json!(content);
        }
        if !message.tool_calls.is_empty() {
            converted["tool_calls"] = Value::Array(
                message
                    .tool_calls
                    .iter()
                    .map(tool_call_to_openai_spec)
                    .collect(),
            );
        }
        if let Some(tool_call_id) = &message.tool_call_id {
            converted["tool_call_id"] = json!(tool_call_id);
        }
        payload.push(converted);
    }
    payload
}

fn tool_call_to_openai_spec(call: &ToolCall) -> Value {
    json!({
        "id": call.id,
        "type": "function",
        "function": {
            "name": call.name,
            // Arguments travel as JSON text inside the JSON document.
            "arguments": call.arguments,
        }
    })
}

/// Convert tools into the chat completions function-tool format. Tool
/// names share one flat namespace; a duplicate is a configuration error.
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut unique = HashSet::new();
    let mut result = Vec::new();
    for tool in tools {
        if !unique.insert(tool.name.as_str()) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }
        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }
    Ok(result)
}

/// Pull the assistant message out of a chat completions response.
pub fn openai_response_to_chat_message(response: &Value) -> Result<ChatMessage> {
    let message = response
        .pointer("/choices/0/message")
        .ok_or_else(|| anyhow!("Response did not contain any choices"))?;

    let role = message
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or("assistant")
        .to_string();
    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let function = call
                .get("function")
                .ok_or_else(|| anyhow!("Tool call without a function"))?;
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("Tool call without a function name"))?
                .to_string();
            // Usually a string of JSON text; some compatible servers send
            // the object directly.
            let arguments = match function.get("arguments") {
                Some(Value::String(text)) => text.clone(),
                Some(value) => value.to_string(),
                None => String::new(),
            };
            tool_calls.push(ToolCall::new(id, name, arguments));
        }
    }

    Ok(ChatMessage {
        role,
        content,
        tool_calls,
        tool_call_id: None,
    })
}

/// Error from an OpenAI compatible endpoint when the exchange no longer
/// fits the model's context window.
#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(pub String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}
