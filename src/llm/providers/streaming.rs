//! OpenAI-compatible chat-completions provider with server-sent-event
//! streaming.
//!
//! Streaming keeps long generations alive through proxies that cut idle
//! connections, and lets the reasoning channel be captured separately from
//! the final answer.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::{GenerationRequest, GenerationResult, LlmProvider, Message, Usage};

/// Default endpoint base URL.
pub const DEFAULT_BASE_URL: &str = "https://integrate.api.nvidia.com/v1";

/// Default model to use if none specified.
pub const DEFAULT_MODEL: &str = "moonshotai/kimi-k2.5";

/// System message prepended to requests that carry none.
pub const CODE_ONLY_SYSTEM_PROMPT: &str = "You are a code generator. Output ONLY the requested \
code or JSON. No explanations, no markdown commentary, no thinking out loud. Start directly \
with the content.";

/// TCP connect timeout. The overall deadline is enforced by the client.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Provider for `/chat/completions` endpoints.
pub struct StreamingProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    stream: bool,
    system_prompt: Option<String>,
}

impl StreamingProvider {
    /// Create a provider against the default endpoint and model, streaming
    /// enabled.
    pub fn new(api_key: String) -> Self {
        Self::with_custom_url(
            api_key,
            DEFAULT_BASE_URL.to_string(),
            DEFAULT_MODEL.to_string(),
        )
    }

    /// Create a provider against a custom endpoint.
    pub fn with_custom_url(api_key: String, base_url: String, model: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: model,
            stream: true,
            system_prompt: Some(CODE_ONLY_SYSTEM_PROMPT.to_string()),
        }
    }

    /// Toggle SSE streaming.
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Replace (or disable, with `None`) the default system message.
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    /// Masked version of the API key for logging.
    pub fn api_key_masked(&self) -> String {
        if self.api_key.len() <= 8 {
            return "*".repeat(self.api_key.len());
        }
        format!(
            "{}...{}",
            &self.api_key[..4],
            &self.api_key[self.api_key.len() - 4..]
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
    }

    fn build_request(&self, request: &GenerationRequest) -> ApiRequest {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &self.system_prompt {
            if !request.has_system_message() {
                messages.push(Message::system(system.clone()));
            }
        }
        messages.extend(request.messages.iter().cloned());

        ApiRequest {
            model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: self.stream,
        }
    }

    async fn execute_request(&self, request: &ApiRequest) -> Result<GenerationResult, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let http_response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(LlmError::RateLimited(message));
            }
            return Err(LlmError::Api {
                status: status_code,
                message,
            });
        }

        if request.stream {
            let mut accumulator = StreamAccumulator::default();
            let mut body = http_response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let bytes = chunk.map_err(|e| LlmError::RequestFailed(e.to_string()))?;
                accumulator.push_bytes(&bytes);
            }

            if accumulator.skipped_chunks() > 0 {
                tracing::debug!(
                    skipped = accumulator.skipped_chunks(),
                    "Skipped malformed stream chunks"
                );
            }
            return Ok(accumulator.finish());
        }

        let body = http_response
            .text()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;
        parse_completion_body(&body)
    }
}

#[async_trait]
impl LlmProvider for StreamingProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, LlmError> {
        let api_request = self.build_request(request);
        self.execute_request(&api_request).await
    }
}

/// Parse a non-streamed completion body.
fn parse_completion_body(body: &str) -> Result<GenerationResult, LlmError> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

    let usage = response.usage.map(Usage::from);
    let Some(choice) = response.choices.into_iter().next() else {
        return Ok(GenerationResult::Empty);
    };

    let message = choice.message;
    let reasoning = message
        .reasoning_content
        .or(message.reasoning)
        .unwrap_or_default();

    Ok(GenerationResult::from_channels(
        message.content.unwrap_or_default(),
        reasoning,
        usage,
    ))
}

/// Incremental decoder for a `text/event-stream` chat-completions body.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence, so
/// only complete lines are decoded.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pending: Vec<u8>,
    text: String,
    reasoning: String,
    usage: Option<Usage>,
    chunks: usize,
    skipped: usize,
}

impl StreamAccumulator {
    /// Feed raw body bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.push_line(&line);
        }
    }

    /// Feed a single SSE line.
    pub fn push_line(&mut self, line: &str) {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();
        if data.is_empty() || data == "[DONE]" {
            return;
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(_) => {
                self.skipped += 1;
                return;
            }
        };

        self.chunks += 1;
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }

        for choice in chunk.choices {
            let Some(delta) = choice.delta else {
                continue;
            };
            if let Some(content) = delta.content {
                self.text.push_str(&content);
            }
            match (delta.reasoning_content, delta.reasoning) {
                (Some(reasoning), _) => self.reasoning.push_str(&reasoning),
                (None, Some(reasoning)) => self.reasoning.push_str(&reasoning),
                (None, None) => {}
            }
        }
    }

    /// Number of well-formed data chunks consumed.
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Number of data lines that failed to parse.
    pub fn skipped_chunks(&self) -> usize {
        self.skipped
    }

    /// Flush any unterminated trailing line and classify the result.
    pub fn finish(mut self) -> GenerationResult {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.push_line(&line);
        }
        GenerationResult::from_channels(self.text, self.reasoning, self.usage)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
