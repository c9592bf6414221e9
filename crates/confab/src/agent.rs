use anyhow::Result;
use async_stream::try_stream;
use futures::future::join_all;
use futures::stream::BoxStream;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};
use crate::providers::base::{ChatMessage, Provider};
use crate::systems::System;

/// Agent integrates systems and a provider to run conversation turns.
///
/// Each system contributes its tools to one flat namespace. During a turn
/// the agent keeps calling the provider, dispatching any tool calls it
/// requests, until the model answers without asking for a tool.
pub struct Agent {
    systems: Vec<Box<dyn System>>,
    provider: Box<dyn Provider + Send + Sync>,
    instructions: Option<String>,
}

impl Agent {
    pub fn new(provider: Box<dyn Provider + Send + Sync>) -> Self {
        Agent {
            systems: Vec::new(),
            provider,
            instructions: None,
        }
    }

    /// Add a system to the agent
    pub fn add_system(&mut self, system: Box<dyn System>) {
        self.systems.push(system);
    }

    /// Set the instructions sent as the system message of every turn
    pub fn set_instructions<I: Into<String>>(&mut self, instructions: I) {
        self.instructions = Some(instructions.into());
    }

    /// All tools the systems expose, in one flat namespace
    fn get_tools(&self) -> Vec<Tool> {
        self.systems
            .iter()
            .flat_map(|system| system.tools().iter().cloned())
            .collect()
    }

    /// Find the system that serves the named tool
    fn get_system_for_tool(&self, name: &str) -> Option<&dyn System> {
        self.systems
            .iter()
            .find(|system| system.tools().iter().any(|tool| tool.name == name))
            .map(|system| system.as_ref())
    }

    /// Dispatch a single tool call to the system that owns it.
    ///
    /// A tool that ran and failed reports that inside Ok, as error payload
    /// text the model can read. An Err means the call itself could not be
    /// carried out and the turn cannot honestly continue.
    async fn dispatch_tool_call(&self, tool_call: &ToolCall) -> AgentResult<String> {
        let system = self
            .get_system_for_tool(&tool_call.name)
            .ok_or_else(|| AgentError::ToolNotFound(tool_call.name.clone()))?;
        system.call(tool_call.clone()).await
    }

    /// Run one conversation turn, streaming the assistant's visible
    /// messages as they arrive. Tool traffic is logged, not yielded; an
    /// infrastructure failure ends the stream with the error.
    pub fn reply(&self, messages: &[Message]) -> BoxStream<'_, Result<Message>> {
        let mut exchange: Vec<ChatMessage> = messages.iter().map(ChatMessage::from).collect();
        let system = self.instructions.clone().unwrap_or_default();

        Box::pin(try_stream! {
            let tools = self.get_tools();
            loop {
                let (reply, usage) = self.provider.complete(&system, &exchange, &tools).await?;
                tracing::debug!(
                    "completion used {:?} input and {:?} output tokens",
                    usage.input_tokens,
                    usage.output_tokens
                );

                let text = reply.text().to_string();
                exchange.push(reply.clone());
                if !text.is_empty() {
                    yield Message::assistant(text);
                }
                tokio::task::yield_now().await;

                if reply.tool_calls.is_empty() {
                    break;
                }

                // Tool calls are independent of each other; run them
                // concurrently but append results in request order.
                let dispatches = reply
                    .tool_calls
                    .iter()
                    .map(|tool_call| self.dispatch_tool_call(tool_call));
                let outputs = join_all(dispatches).await;
                for (tool_call, output) in reply.tool_calls.iter().zip(outputs) {
                    let result = output?;
                    tracing::info!("tool {} answered call {}", tool_call.name, tool_call.id);
                    exchange.push(ChatMessage::tool(tool_call.id.clone(), result));
                }
            }
        })
    }
}
