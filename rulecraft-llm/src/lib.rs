//! # rulecraft-llm
//!
//! The text-generation side of rulecraft.
//!
//! ## Core Concepts
//! - **Provider**: Trait-based HTTP clients (OpenAI-compatible, in-house chat API)
//! - **Gateway**: The capability the refinement loop depends on - messages in,
//!   text out, failures as `ExternalService` errors
//! - **Retrying**: Optional backoff layer so the caller never retries itself

pub mod error;
pub mod provider;
pub mod gateway;

pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use provider::{
    LlmProvider, ProviderConfig, ProviderType, ProviderError,
    ChatMessage, Role, CompletionRequest, CompletionResponse,
    FinishReason, Usage,
    OpenAIProvider, InternalChatProvider,
};
pub use gateway::{Gateway, ProviderGateway, Retrying, RetryPolicy};
