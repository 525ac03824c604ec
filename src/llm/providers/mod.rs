//! Transport implementations of [`crate::llm::LlmProvider`].

pub mod streaming;

pub use streaming::{StreamAccumulator, StreamingProvider, CODE_ONLY_SYSTEM_PROMPT};
