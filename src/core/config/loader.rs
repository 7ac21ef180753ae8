#![allow(clippy::result_large_err)]

use super::{AgentConfig, ConfigValidator};
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from workspace root (workspace/conduit.toml)
    /// Environment variables override config file values
    pub fn load_from_workspace(workspace_path: &Path) -> Result<AgentConfig, AppError> {
        let config_path = workspace_path.join("conduit.toml");
        let config_file = Self::load_from_file(&config_path)?;

        let mut config = config_file.unwrap_or_default();
        Self::apply_env_overrides(&mut config);
        Self::validate_config(&config)?;

        tracing::debug!(
            path = %config_path.display(),
            max_rounds = config.conversation.max_rounds,
            max_tool_failures = config.conversation.max_tool_failures,
            "loaded agent configuration"
        );
        Ok(config)
    }

    /// Load config from specific file path
    /// Returns Ok(None) if file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<AgentConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
            .with_code("AGT-CONFIG-001")
        })?;

        let config: AgentConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
            .with_code("AGT-CONFIG-002")
        })?;

        Ok(Some(config))
    }

    /// Apply environment variable overrides to the configuration
    /// Unparseable values are ignored and the current value is kept
    fn apply_env_overrides(config: &mut AgentConfig) {
        // Conversation overrides
        override_parsed("CONDUIT_MAX_ROUNDS", &mut config.conversation.max_rounds);
        override_parsed(
            "CONDUIT_MAX_TOOL_FAILURES",
            &mut config.conversation.max_tool_failures,
        );
        if let Ok(timeout) = env::var("CONDUIT_LLM_TIMEOUT") {
            config.conversation.llm_timeout = timeout;
        }
        if let Ok(value) = env::var("CONDUIT_TEMPERATURE") {
            if let Ok(temperature) = value.parse::<f32>() {
                config.conversation.temperature = Some(temperature);
            }
        }
        if let Ok(value) = env::var("CONDUIT_MAX_TOKENS") {
            if let Ok(max_tokens) = value.parse::<u32>() {
                config.conversation.max_tokens = Some(max_tokens);
            }
        }
        if let Ok(model) = env::var("CONDUIT_MODEL") {
            config.conversation.model = Some(model);
        }
        if let Ok(prompt) = env::var("CONDUIT_SYSTEM_PROMPT") {
            config.conversation.system_prompt = Some(prompt);
        }

        // Memory overrides
        override_parsed(
            "CONDUIT_MEMORY_MAX_CONVERSATIONS",
            &mut config.memory.max_conversations,
        );
        override_parsed(
            "CONDUIT_MEMORY_MAX_CONTEXT_CHARS",
            &mut config.memory.max_context_chars,
        );
        if let Ok(ttl) = env::var("CONDUIT_MEMORY_TTL") {
            config.memory.ttl = ttl;
        }

        // State overrides
        override_parsed("CONDUIT_STATE_SAVE_ATTEMPTS", &mut config.state.save_attempts);
        if let Ok(directory) = env::var("CONDUIT_STATE_DIR") {
            config.state.directory = PathBuf::from(directory);
        }

        // Tools overrides
        override_parsed(
            "CONDUIT_ARRAY_MERGE_STRATEGY",
            &mut config.tools.array_merge_strategy,
        );
    }

    /// Get documentation for supported environment variables
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "CONDUIT_MAX_ROUNDS - Override the round cap (default: 10)",
            "CONDUIT_MAX_TOOL_FAILURES - Override the failure cap (default: 3)",
            "CONDUIT_LLM_TIMEOUT - Override the per-call LLM timeout (default: 60s)",
            "CONDUIT_TEMPERATURE - Override the sampling temperature",
            "CONDUIT_MAX_TOKENS - Override the completion token limit",
            "CONDUIT_MODEL - Override the model name",
            "CONDUIT_SYSTEM_PROMPT - Replace the generated base system prompt",
            "CONDUIT_MEMORY_MAX_CONVERSATIONS - Override the number of remembered conversations (default: 5)",
            "CONDUIT_MEMORY_MAX_CONTEXT_CHARS - Override the memory context budget (default: 4000)",
            "CONDUIT_MEMORY_TTL - Override stored conversation retention (default: 720h)",
            "CONDUIT_STATE_SAVE_ATTEMPTS - Override final state save attempts (default: 3)",
            "CONDUIT_STATE_DIR - Override the state directory (default: .conduit/state/conversations)",
            "CONDUIT_ARRAY_MERGE_STRATEGY - append or replace (default: append)",
        ]
    }

    /// Validate configuration values
    pub fn validate_config(config: &AgentConfig) -> Result<(), AppError> {
        ConfigValidator::validate(config)
    }
}

fn override_parsed<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = env::var(name) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(variable = name, value = %raw, "ignoring unparseable override"),
        }
    }
}
