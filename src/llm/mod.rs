//! LLM integration module.
//!
//! - [`types`]: request/result types and the [`LlmProvider`] trait
//! - [`providers`]: the HTTP transport (SSE streaming chat completions)
//! - [`rate_limit`]: minimum-interval admission control
//! - [`client`]: [`GenerationClient`], which combines all of the above with
//!   a concurrency cap, a per-call deadline and retries
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use artifact_forge::llm::{ClientConfig, GenerationClient, GenerationRequest, StreamingProvider};
//!
//! let provider = Arc::new(StreamingProvider::new(api_key));
//! let client = GenerationClient::new(provider, ClientConfig::default());
//! let result = client.complete(&GenerationRequest::new("Write src/main.rs")).await?;
//! ```

pub mod client;
pub mod providers;
pub mod rate_limit;
pub mod types;

pub use client::{ClientConfig, GenerationClient};
pub use providers::{StreamAccumulator, StreamingProvider};
pub use rate_limit::IntervalLimiter;
pub use types::{GenerationRequest, GenerationResult, LlmProvider, Message, Usage};
