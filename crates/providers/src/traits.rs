use px_domain::chat::{LlmResponse, Message, ToolDefinition};
use px_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
///
/// The option fields are the complete recognized set; adapters map each
/// to its backend-specific spelling (or drop it, for backends with
/// fixed values).
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Model identifier override. When `None`, the adapter uses the
    /// model it was constructed for.
    pub model: Option<String>,
    /// Maximum tokens in the response. `None` lets the backend choose.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0 – 2.0). `None` lets the backend choose.
    pub temperature: Option<f32>,
    /// Opaque tag for backend-side KV-prefix caching.
    pub prompt_cache_key: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM adapter must implement.
///
/// Implementations are backend-specific adapters that translate between
/// the internal chat types and each backend's HTTP wire format. They
/// hold no mutable state after construction and are shared freely
/// across concurrent turns.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync + std::fmt::Debug {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<LlmResponse>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
