//! Oracle and embedding backends.
//!
//! - [`OpenAiClient`]: HTTP client for OpenAI-compatible servers
//! - [`LlmOracle`]: prompts + lenient decoding on top of any [`Completion`](crate::traits::oracle::Completion)
//! - [`Retrying`]: per-call timeouts and bounded retries around any oracle

pub mod llm;
#[cfg(feature = "openai")]
pub mod openai;
pub mod retry;

pub use llm::LlmOracle;
#[cfg(feature = "openai")]
pub use openai::{resolve_model_alias, ApiKey, OpenAiClient};
pub use retry::{with_retry, Retrying};
