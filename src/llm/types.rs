//! Request and result types shared by every LLM provider.
//!
//! The endpoint can answer on two channels: the final answer (`content`) and
//! an internal monologue (`reasoning_content`). Some upstream models burn
//! their whole output budget on the second one, so the result is modelled as
//! a tagged union rather than a pair of optional strings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Default output budget for a single request.
pub const DEFAULT_MAX_TOKENS: u32 = 16384;

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Request for text generation. Built once per call and never mutated by
/// the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier; empty means "use the provider default".
    #[serde(default)]
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Maximum number of output tokens.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: f64,
    /// Overrides the client's attempt budget for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl GenerationRequest {
    /// Create a single-turn request for `prompt` with default parameters.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: String::new(),
            messages: vec![Message::user(prompt)],
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            max_retries: None,
        }
    }

    /// Create a request from an explicit conversation.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::new("")
        }
    }

    /// Prepend a system message.
    pub fn with_system(mut self, content: impl Into<String>) -> Self {
        self.messages.insert(0, Message::system(content));
        self
    }

    /// Set the model for this request.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the output budget for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the attempt budget for this request.
    pub fn with_retry_budget(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Whether the conversation already carries a system message.
    pub fn has_system_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == "system")
    }

    /// Content of the last user message.
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Number of tokens generated.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens used.
    #[serde(default)]
    pub total_tokens: u32,
}

/// Outcome of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    /// The final-answer channel carried text.
    Completed { text: String, usage: Option<Usage> },
    /// Only the reasoning channel carried text; the model ran out of budget
    /// before answering.
    ThinkingOnly {
        reasoning: String,
        usage: Option<Usage>,
    },
    /// Neither channel carried anything.
    Empty,
}

impl GenerationResult {
    /// Classify the two accumulated channels.
    pub fn from_channels(text: String, reasoning: String, usage: Option<Usage>) -> Self {
        if !text.trim().is_empty() {
            GenerationResult::Completed { text, usage }
        } else if !reasoning.trim().is_empty() {
            GenerationResult::ThinkingOnly { reasoning, usage }
        } else {
            GenerationResult::Empty
        }
    }

    /// A result is usable when at least one channel is non-empty.
    pub fn is_usable(&self) -> bool {
        !matches!(self, GenerationResult::Empty)
    }

    pub fn is_thinking_only(&self) -> bool {
        matches!(self, GenerationResult::ThinkingOnly { .. })
    }

    /// The final answer if present, otherwise the reasoning text.
    pub fn best_text(&self) -> Option<&str> {
        match self {
            GenerationResult::Completed { text, .. } => Some(text),
            GenerationResult::ThinkingOnly { reasoning, .. } => Some(reasoning),
            GenerationResult::Empty => None,
        }
    }

    pub fn usage(&self) -> Option<&Usage> {
        match self {
            GenerationResult::Completed { usage, .. }
            | GenerationResult::ThinkingOnly { usage, .. } => usage.as_ref(),
            GenerationResult::Empty => None,
        }
    }
}

/// A transport able to perform a single generation attempt.
///
/// Providers never retry; pacing, concurrency and retries belong to
/// [`crate::llm::GenerationClient`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform one request against the endpoint.
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let system = Message::system("You are a code generator.");
        assert_eq!(system.role, "system");

        let user = Message::user("Write main.rs");
        assert_eq!(user.role, "user");
        assert_eq!(user.content, "Write main.rs");

        let assistant = Message::assistant("fn main() {}");
        assert_eq!(assistant.role, "assistant");
    }

    #[test]
    fn test_generation_request_builder() {
        let request = GenerationRequest::new("Write package.json")
            .with_system("Output only code.")
            .with_model("moonshotai/kimi-k2.5")
            .with_max_tokens(6500)
            .with_temperature(0.3)
            .with_retry_budget(2);

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert!(request.has_system_message());
        assert_eq!(request.prompt(), "Write package.json");
        assert_eq!(request.model, "moonshotai/kimi-k2.5");
        assert_eq!(request.max_tokens, 6500);
        assert_eq!(request.temperature, 0.3);
        assert_eq!(request.max_retries, Some(2));
    }

    #[test]
    fn test_request_defaults() {
        let request = GenerationRequest::new("hi");
        assert!(request.model.is_empty());
        assert!(!request.has_system_message());
        assert_eq!(request.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(request.max_retries, None);
    }

    #[test]
    fn test_result_prefers_final_answer() {
        let result = GenerationResult::from_channels(
            "export default {}".to_string(),
            "thinking...".to_string(),
            None,
        );
        assert!(matches!(result, GenerationResult::Completed { .. }));
        assert_eq!(result.best_text(), Some("export default {}"));
    }

    #[test]
    fn test_result_falls_back_to_reasoning() {
        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 6000,
            total_tokens: 6010,
        };
        let result = GenerationResult::from_channels(
            "  \n".to_string(),
            "Let me think about this file".to_string(),
            Some(usage),
        );
        assert!(result.is_thinking_only());
        assert!(result.is_usable());
        assert_eq!(result.best_text(), Some("Let me think about this file"));
        assert_eq!(result.usage(), Some(&usage));
    }

    #[test]
    fn test_result_empty() {
        let result = GenerationResult::from_channels(String::new(), " ".to_string(), None);
        assert_eq!(result, GenerationResult::Empty);
        assert!(!result.is_usable());
        assert_eq!(result.best_text(), None);
        assert_eq!(result.usage(), None);
    }
}
