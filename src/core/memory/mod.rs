#![allow(clippy::result_large_err)]

//! Conversation memory: prior-run context for prompts and run recording.

use crate::core::config::MemoryConfig;
use crate::core::error::AppError;
use crate::core::events::{single_items, NodeEventEmitter};
use async_trait::async_trait;
use conduit_types::{AgentConversation, ConversationStatus};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Query against the external conversation store.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationFilter {
    pub session_id: String,
    pub workspace_id: String,
    pub limit: usize,
    pub status: Option<ConversationStatus>,
    pub include_tools: bool,
}

/// External conversation store (Redis, SQL, platform-native ...).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Most recent conversations first.
    async fn retrieve_conversations(
        &self,
        filter: ConversationFilter,
    ) -> Result<Vec<AgentConversation>, AppError>;

    async fn store_conversation(
        &self,
        record: AgentConversation,
        partition_key: &str,
        ttl: Duration,
    ) -> Result<(), AppError>;
}

/// Memory operations used by the conversation loop. Implementations never
/// fail the run: errors are logged and the input is returned unchanged.
#[async_trait]
pub trait MemoryManager: Send + Sync {
    async fn retrieve_context(&self, workspace_id: &str, emitter: &NodeEventEmitter) -> String;

    async fn store_start(&self, conversation: &AgentConversation, emitter: &NodeEventEmitter);

    /// Record the finished run; `conversation.status` is completed or failed.
    async fn store_complete(&self, conversation: &AgentConversation, emitter: &NodeEventEmitter);

    async fn enhance_system_prompt(
        &self,
        base_prompt: &str,
        workspace_id: &str,
        emitter: &NodeEventEmitter,
    ) -> String;
}

/// Used when no memory node is bound to the agent.
pub struct NoopMemoryManager;

#[async_trait]
impl MemoryManager for NoopMemoryManager {
    async fn retrieve_context(&self, _workspace_id: &str, _emitter: &NodeEventEmitter) -> String {
        String::new()
    }

    async fn store_start(&self, _conversation: &AgentConversation, _emitter: &NodeEventEmitter) {}

    async fn store_complete(&self, _conversation: &AgentConversation, _emitter: &NodeEventEmitter) {}

    async fn enhance_system_prompt(
        &self,
        base_prompt: &str,
        _workspace_id: &str,
        _emitter: &NodeEventEmitter,
    ) -> String {
        base_prompt.to_string()
    }
}

/// Memory backed by a [`ConversationStore`], attributed to the memory node.
pub struct StoreMemoryManager {
    store: Arc<dyn ConversationStore>,
    node_id: String,
    session_id: String,
    config: MemoryConfig,
}

impl StoreMemoryManager {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        node_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            node_id: node_id.into(),
            session_id: session_id.into(),
            config: MemoryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MemoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn store(
        &self,
        operation: &str,
        conversation: &AgentConversation,
        emitter: &NodeEventEmitter,
    ) {
        let input = single_items(
            "memory",
            json!({
                "operation": operation,
                "conversation_id": conversation.conversation_id,
                "status": conversation.status.as_str(),
            }),
        );
        emitter.started(&self.node_id).await;

        let mut record = conversation.clone();
        record.session_id = self.session_id.clone();
        let partition_key = format!("{}:{}", conversation.workspace_id, self.session_id);

        match self
            .store
            .store_conversation(record, &partition_key, self.config.ttl())
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    conversation_id = %conversation.conversation_id,
                    operation,
                    "stored conversation in memory"
                );
                emitter
                    .executed(
                        &self.node_id,
                        input,
                        single_items("output_0", json!({"stored": true})),
                    )
                    .await;
            }
            Err(err) => {
                tracing::warn!(
                    conversation_id = %conversation.conversation_id,
                    operation,
                    error = %err,
                    "failed to store conversation in memory"
                );
                emitter.failed(&self.node_id, &err.message, input).await;
            }
        }
    }
}

#[async_trait]
impl MemoryManager for StoreMemoryManager {
    async fn retrieve_context(&self, workspace_id: &str, emitter: &NodeEventEmitter) -> String {
        let filter = ConversationFilter {
            session_id: self.session_id.clone(),
            workspace_id: workspace_id.to_string(),
            limit: self.config.max_conversations,
            status: None,
            include_tools: self.config.include_tools,
        };
        let input = single_items(
            "memory",
            json!({
                "operation": "retrieve",
                "session_id": filter.session_id,
                "limit": filter.limit,
            }),
        );
        emitter.started(&self.node_id).await;

        match self.store.retrieve_conversations(filter).await {
            Ok(conversations) => {
                let context = format_context(
                    &conversations,
                    self.config.max_conversations,
                    self.config.response_preview_chars,
                    self.config.max_context_chars,
                );
                tracing::debug!(
                    session_id = %self.session_id,
                    conversations = conversations.len(),
                    chars = context.chars().count(),
                    "retrieved memory context"
                );
                emitter
                    .executed(
                        &self.node_id,
                        input,
                        single_items(
                            "output_0",
                            json!({"conversations": conversations.len(), "context": context}),
                        ),
                    )
                    .await;
                context
            }
            Err(err) => {
                tracing::warn!(session_id = %self.session_id, error = %err, "memory retrieval failed");
                emitter.failed(&self.node_id, &err.message, input).await;
                String::new()
            }
        }
    }

    async fn store_start(&self, conversation: &AgentConversation, emitter: &NodeEventEmitter) {
        self.store("store_start", conversation, emitter).await;
    }

    async fn store_complete(&self, conversation: &AgentConversation, emitter: &NodeEventEmitter) {
        self.store("store_complete", conversation, emitter).await;
    }

    async fn enhance_system_prompt(
        &self,
        base_prompt: &str,
        workspace_id: &str,
        emitter: &NodeEventEmitter,
    ) -> String {
        let context = self.retrieve_context(workspace_id, emitter).await;
        if context.is_empty() {
            return base_prompt.to_string();
        }
        format!(
            "{}\n\n## Previous conversations\n\nUse these earlier interactions with this user when relevant:\n\n{}",
            base_prompt.trim_end(),
            context
        )
    }
}

/// Human-readable summary of recent conversations within a character budget.
pub fn format_context(
    conversations: &[AgentConversation],
    max_conversations: usize,
    response_preview_chars: usize,
    max_chars: usize,
) -> String {
    let summaries: Vec<String> = conversations
        .iter()
        .take(max_conversations)
        .enumerate()
        .map(|(index, conversation)| summarize(index + 1, conversation, response_preview_chars))
        .collect();
    truncate_at_sentence(&summaries.join("\n\n"), max_chars)
}

fn summarize(position: usize, conversation: &AgentConversation, preview_chars: usize) -> String {
    let mut lines = vec![format!(
        "{}. User asked: {}",
        position,
        conversation.user_prompt.trim()
    )];
    if !conversation.final_response.is_empty() {
        lines.push(format!(
            "   Response: {}",
            preview(conversation.final_response.trim(), preview_chars)
        ));
    }
    if !conversation.tools_used.is_empty() {
        lines.push(format!("   Tools used: {}", conversation.tools_used.join(", ")));
    }
    lines.push(format!(
        "   Execution time: {}ms",
        conversation.metadata.execution_time_ms
    ));
    if conversation.metadata.tool_failures > 0 {
        lines.push(format!(
            "   Tool failures: {}",
            conversation.metadata.tool_failures
        ));
    }
    if conversation.status == ConversationStatus::Failed {
        lines.push("   Status: failed".to_string());
    }
    lines.join("\n")
}

fn preview(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Cut `text` to at most `max_chars` characters, preferring the last sentence
/// boundary in the second half of the budget.
pub fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };
    let head = &text[..cut];
    let boundary = head
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|(index, c)| index + c.len_utf8())
        .filter(|end| *end >= head.len() / 2)
        .last();
    match boundary {
        Some(end) => format!("{}\n[memory truncated]", head[..end].trim_end()),
        None => format!("{}...\n[memory truncated]", head),
    }
}
