#![allow(clippy::result_large_err)]

use super::AgentConfig;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration rules
    pub fn validate(config: &AgentConfig) -> Result<(), AppError> {
        if config.conversation.max_rounds == 0 {
            return Err(invalid("conversation.max_rounds must be at least 1"));
        }

        if config.conversation.max_tool_failures == 0 {
            return Err(invalid("conversation.max_tool_failures must be at least 1"));
        }

        if config.conversation.stream_buffer == 0 {
            return Err(invalid("conversation.stream_buffer must be at least 1"));
        }

        if let Some(temperature) = config.conversation.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(invalid("conversation.temperature must be between 0.0 and 2.0"));
            }
        }

        for (field, value) in [
            ("conversation.llm_timeout", &config.conversation.llm_timeout),
            ("memory.ttl", &config.memory.ttl),
            ("state.save_backoff", &config.state.save_backoff),
        ] {
            if humantime::parse_duration(value.trim()).is_err() {
                return Err(invalid(format!(
                    "{} is not a valid duration: '{}'",
                    field, value
                )));
            }
        }

        if config.state.save_attempts == 0 {
            return Err(invalid("state.save_attempts must be at least 1"));
        }

        if config.state.directory.as_os_str().is_empty() {
            return Err(invalid("state.directory cannot be empty"));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::new(ErrorCategory::ValidationError, message).with_code("AGT-CONFIG-003")
}
