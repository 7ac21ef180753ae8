//! Contract the agent core requires from an LLM provider client.

use async_trait::async_trait;
use conduit_types::{ConversationMessage, ToolCallRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// Tool schema as handed to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateRequest {
    pub messages: Vec<ConversationMessage>,
    pub tools: Vec<LlmToolSpec>,
    pub system_prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: Option<String>,
}

impl GenerateResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
        }
    }

    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            finish_reason: Some("tool_calls".to_string()),
        }
    }
}

/// Incremental output of a streaming generation.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    ToolCall(ToolCallRequest),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("provider rejected credentials: {0}")]
    Authentication(String),
    #[error("provider rate limit: {0}")]
    RateLimited(String),
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Structural failures end the run regardless of the failure budget.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ProviderError::Unreachable(_) | ProviderError::Authentication(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Unreachable(_) => "AGT-LLM-001",
            ProviderError::Authentication(_) => "AGT-LLM-002",
            ProviderError::RateLimited(_) => "AGT-LLM-003",
            ProviderError::Timeout(_) => "AGT-LLM-004",
            ProviderError::InvalidResponse(_) => "AGT-LLM-005",
            ProviderError::Other(_) => "AGT-LLM-006",
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ProviderError>;

    /// Streaming variant. Providers without native streaming emit the final
    /// text as a single chunk.
    async fn generate_stream(
        &self,
        request: GenerateRequest,
        chunks: mpsc::Sender<StreamChunk>,
    ) -> Result<GenerateResponse, ProviderError> {
        let response = self.generate(request).await?;
        if !response.content.is_empty() {
            let _ = chunks.send(StreamChunk::Text(response.content.clone())).await;
        }
        Ok(response)
    }
}

/// Receives streamed chunks from the consumer task of an in-flight LLM call.
#[async_trait]
pub trait StreamObserver: Send + Sync {
    async fn on_chunk(&self, chunk: StreamChunk);
}
