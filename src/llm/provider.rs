//! Provider-agnostic completion interface.
//!
//! The classification engine talks to this trait, never to a concrete
//! backend; tests substitute mock providers.

use async_trait::async_trait;

use crate::error::LlmError;

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

/// A single chat message.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Concatenated system messages, if any.
    pub fn system_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Concatenated user messages.
    pub fn user_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Backend-agnostic LLM provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Run one completion round-trip.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_sets_fields() {
        let req = CompletionRequest::new(vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hello"),
        ])
        .with_temperature(0.2)
        .with_max_tokens(500);

        assert_eq!(req.temperature, Some(0.2));
        assert_eq!(req.max_tokens, Some(500));
        assert_eq!(req.system_text().as_deref(), Some("be terse"));
        assert_eq!(req.user_text(), "hello");
    }

    #[test]
    fn system_text_absent_without_system_messages() {
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")]);
        assert!(req.system_text().is_none());
    }

    #[test]
    fn multiple_user_messages_joined() {
        let req = CompletionRequest::new(vec![
            ChatMessage::user("part one"),
            ChatMessage::user("part two"),
        ]);
        assert_eq!(req.user_text(), "part one\npart two");
    }
}
