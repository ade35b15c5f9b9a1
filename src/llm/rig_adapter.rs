//! Bridge between rig-core completion models and our `LlmProvider` trait.

use async_trait::async_trait;

use rig::completion::CompletionModel;
use rig::message::AssistantContent;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Adapter wrapping any rig `CompletionModel`.
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M: CompletionModel> LlmProvider for RigAdapter<M> {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let user_text = request.user_text();
        let mut builder = self
            .model
            .completion_request(rig::completion::Message::user(user_text));

        if let Some(system) = request.system_text() {
            builder = builder.preamble(system);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature as f64);
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens as u64);
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.model_name.clone(),
            reason: e.to_string(),
        })?;

        let content: String = response
            .choice
            .into_iter()
            .filter_map(|part| match part {
                AssistantContent::Text(text) => Some(text.text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if content.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.model_name.clone(),
                reason: "response contained no text content".into(),
            });
        }

        Ok(CompletionResponse {
            content,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        })
    }
}
