use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use super::base::{ChatMessage, Provider, Usage};
use crate::models::tool::Tool;

/// A provider that returns scripted responses in order, for tests.
pub struct MockProvider {
    responses: Arc<Mutex<Vec<ChatMessage>>>,
}

impl MockProvider {
    pub fn new(responses: Vec<ChatMessage>) -> Self {
        MockProvider {
            responses: Arc::new(Mutex::new(responses)),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        _system: &str,
        _messages: &[ChatMessage],
        _tools: &[Tool],
    ) -> Result<(ChatMessage, Usage)> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok((ChatMessage::assistant("Mock response"), Usage::default()))
        } else {
            Ok((responses.remove(0), Usage::default()))
        }
    }
}
