use conduit_types::{
    ConversationMessage, ConversationState, ConversationStatus, MessageRole, ToolExecutionRecord,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationResult {
    pub conversation_id: String,
    pub final_response: String,
    pub rounds: u32,
    pub tool_executions: Vec<ToolExecutionRecord>,
    pub tool_failures: u32,
    pub status: ConversationStatus,
    /// The run stopped because it reached the round cap.
    pub hit_round_limit: bool,
    pub duration_ms: u64,
    pub messages: Vec<ConversationMessage>,
}

impl ConversationResult {
    pub fn from_state(state: &ConversationState, hit_round_limit: bool, duration: Duration) -> Self {
        Self {
            conversation_id: state.conversation_id.clone(),
            final_response: final_response(state),
            rounds: state.round,
            tool_executions: state.tool_executions.clone(),
            tool_failures: state.tool_failures,
            status: state.status,
            hit_round_limit,
            duration_ms: duration.as_millis() as u64,
            messages: state.conversation_history.clone(),
        }
    }

    pub fn successful_tool_executions(&self) -> usize {
        self.tool_executions
            .iter()
            .filter(|record| record.success)
            .count()
    }
}

/// Last non-empty assistant reply of the current turn, or a summary of the
/// turn's tool executions. A turn starts at the latest user message.
pub fn final_response(state: &ConversationState) -> String {
    let history = &state.conversation_history;
    let turn_start = history
        .iter()
        .rposition(|message| message.role == MessageRole::User);
    let turn = &history[turn_start.map_or(0, |index| index + 1)..];

    if let Some(reply) = turn
        .iter()
        .rev()
        .filter(|message| message.role == MessageRole::Assistant)
        .map(|message| message.content.trim())
        .find(|content| !content.is_empty())
    {
        return reply.to_string();
    }

    let since = turn_start.map(|index| history[index].timestamp);
    let executions: Vec<&ToolExecutionRecord> = state
        .tool_executions
        .iter()
        .filter(|record| since.map_or(true, |since| record.executed_at >= since))
        .collect();
    format!(
        "Executed {} tools successfully ({} total executions)",
        executions.iter().filter(|record| record.success).count(),
        executions.len()
    )
}
