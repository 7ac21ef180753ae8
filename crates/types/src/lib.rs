//! Serializable data model shared by the conduit agent core and the stores
//! that persist its conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Step driving the function-calling round loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStep {
    #[default]
    LlmCall,
    ToolExecution,
    Completed,
}

impl ConversationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStep::LlmCall => "llm_call",
            ConversationStep::ToolExecution => "tool_execution",
            ConversationStep::Completed => "completed",
        }
    }
}

/// Lifecycle status of a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Paused,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Running => "running",
            ConversationStatus::Completed => "completed",
            ConversationStatus::Failed => "failed",
            ConversationStatus::Paused => "paused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversationStatus::Completed | ConversationStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

/// Tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// One entry of the append-only conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set on tool-result messages so providers can correlate results with calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
            tool_name: None,
            timestamp: Utc::now(),
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Links a tool execution back to the workflow node that exposed the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolIdentity {
    pub node_id: String,
    pub integration_type: String,
    pub action_type: String,
}

/// Per-call execution record kept on the conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub round: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_identity: Option<ToolIdentity>,
    pub executed_at: DateTime<Utc>,
}

/// Diagnostic snapshot of the last error seen by a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateErrorSnapshot {
    pub error_type: String,
    pub message: String,
    pub round: u32,
    pub step: ConversationStep,
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
}

/// Durable snapshot of an agent run, keyed by conversation ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    pub workspace_id: String,
    pub current_step: ConversationStep,
    pub round: u32,
    #[serde(default)]
    pub conversation_history: Vec<ConversationMessage>,
    #[serde(default)]
    pub tool_executions: Vec<ToolExecutionRecord>,
    pub tool_failures: u32,
    pub status: ConversationStatus,
    #[serde(default)]
    pub last_error: Option<StateErrorSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(conversation_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            workspace_id: workspace_id.into(),
            current_step: ConversationStep::LlmCall,
            round: 0,
            conversation_history: Vec::new(),
            tool_executions: Vec::new(),
            tool_failures: 0,
            status: ConversationStatus::Running,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn push_message(&mut self, message: ConversationMessage) {
        self.conversation_history.push(message);
        self.touch();
    }

    pub fn last_assistant_message(&self) -> Option<&ConversationMessage> {
        self.conversation_history
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::Assistant)
    }

    pub fn successful_tool_executions(&self) -> usize {
        self.tool_executions
            .iter()
            .filter(|record| record.success)
            .count()
    }
}

/// Where a resolved parameter value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSource {
    AiProvided,
    PresetValue,
    Missing,
}

/// Audit entry describing how one settings path was resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterResolution {
    pub path: String,
    pub source: ParameterSource,
    pub value: Value,
    pub was_agent_authorized: bool,
    pub ai_value_was_available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub rounds: u32,
    pub tool_failures: u32,
    pub tool_executions: u32,
    pub execution_time_ms: u64,
}

/// Conversation record handed to the external memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConversation {
    pub conversation_id: String,
    pub session_id: String,
    pub workspace_id: String,
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
    pub user_prompt: String,
    #[serde(default)]
    pub final_response: String,
    #[serde(default)]
    pub tools_used: Vec<String>,
    pub status: ConversationStatus,
    #[serde(default)]
    pub metadata: ConversationMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
