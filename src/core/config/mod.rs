use crate::core::settings::ArrayMergeStrategy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration loaded from conduit.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    /// Round loop configuration
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Conversation memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// State persistence configuration
    #[serde(default)]
    pub state: StateConfig,

    /// Tool execution configuration
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Round loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Maximum LLM/tool rounds per run
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Failures tolerated before the run is failed
    #[serde(default = "default_max_tool_failures")]
    pub max_tool_failures: u32,

    /// Per-call LLM timeout (humantime, e.g. "60s")
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Replaces the generated base prompt; enrichments are still appended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Capacity of the streaming chunk queue
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

/// Conversation memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,

    /// Character budget for the combined memory context
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    #[serde(default = "default_response_preview_chars")]
    pub response_preview_chars: usize,

    /// Retention of stored conversations (humantime)
    #[serde(default = "default_memory_ttl")]
    pub ttl: String,

    #[serde(default = "default_include_tools")]
    pub include_tools: bool,
}

/// State persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Attempts for the final state save
    #[serde(default = "default_save_attempts")]
    pub save_attempts: u32,

    /// Delay between final save attempts (humantime)
    #[serde(default = "default_save_backoff")]
    pub save_backoff: String,

    /// Directory for file-backed state, relative to the workspace
    #[serde(default = "default_state_directory")]
    pub directory: PathBuf,
}

/// Tool execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub array_merge_strategy: ArrayMergeStrategy,
}

// Default functions
fn default_max_rounds() -> u32 {
    10
}

fn default_max_tool_failures() -> u32 {
    3
}

fn default_llm_timeout() -> String {
    "60s".to_string()
}

fn default_stream_buffer() -> usize {
    64
}

fn default_max_conversations() -> usize {
    5
}

fn default_max_context_chars() -> usize {
    4000
}

fn default_response_preview_chars() -> usize {
    300
}

fn default_memory_ttl() -> String {
    "720h".to_string()
}

fn default_include_tools() -> bool {
    true
}

fn default_save_attempts() -> u32 {
    3
}

fn default_save_backoff() -> String {
    "100ms".to_string()
}

fn default_state_directory() -> PathBuf {
    PathBuf::from(".conduit/state/conversations")
}

impl Default for ConversationConfig {
    fn default() -> Self {
        ConversationConfig {
            max_rounds: default_max_rounds(),
            max_tool_failures: default_max_tool_failures(),
            llm_timeout: default_llm_timeout(),
            temperature: None,
            max_tokens: None,
            model: None,
            system_prompt: None,
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl ConversationConfig {
    /// Parsed LLM timeout; falls back to 60s when the value is unparseable.
    pub fn llm_timeout(&self) -> Duration {
        parse_duration_or(&self.llm_timeout, Duration::from_secs(60))
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            max_conversations: default_max_conversations(),
            max_context_chars: default_max_context_chars(),
            response_preview_chars: default_response_preview_chars(),
            ttl: default_memory_ttl(),
            include_tools: default_include_tools(),
        }
    }
}

impl MemoryConfig {
    pub fn ttl(&self) -> Duration {
        parse_duration_or(&self.ttl, Duration::from_secs(720 * 3600))
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            save_attempts: default_save_attempts(),
            save_backoff: default_save_backoff(),
            directory: default_state_directory(),
        }
    }
}

impl StateConfig {
    pub fn save_backoff(&self) -> Duration {
        parse_duration_or(&self.save_backoff, Duration::from_millis(100))
    }
}

fn parse_duration_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value.trim()).unwrap_or(fallback)
}


pub mod loader;
pub mod validation;

pub use loader::ConfigLoader;
pub use validation::ConfigValidator;
