use crate::core::tools::{PeekableFieldOptions, ToolDefinition};

const DEFAULT_SYSTEM_PROMPT: &str = "You are an automation agent inside a workflow. \
Complete the user's task by calling the available tools when they help, \
then answer with a concise summary of what was done.";

const TOOL_GUIDANCE: &str = "Call tools only with the parameters described in their schema. \
If a tool fails, decide whether a different call can still complete the task; \
otherwise explain what went wrong.";

/// Constructs the system prompt from the base instructions, the available
/// tools and the options of their peekable fields.
pub struct PromptBuilder;

impl PromptBuilder {
    /// Build the system prompt. A custom prompt replaces the base instructions;
    /// the tool and option sections are appended either way.
    pub fn build_system_prompt(
        custom_prompt: Option<&str>,
        tools: &[ToolDefinition],
        peekable: &[PeekableFieldOptions],
    ) -> String {
        let base = custom_prompt
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let mut prompt = String::from(base);
        prompt.push_str("\n\n");

        if !tools.is_empty() {
            prompt.push_str("## Available tools\n\n");
            for tool in tools {
                prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description.trim()));
            }
            prompt.push('\n');
            prompt.push_str(TOOL_GUIDANCE);
            prompt.push_str("\n\n");
        }

        let hints = Self::peekable_hints(peekable);
        if !hints.is_empty() {
            prompt.push_str(&hints);
        }

        prompt.trim_end().to_string()
    }

    /// Option lists for peekable fields so the model picks real identifiers.
    pub fn peekable_hints(peekable: &[PeekableFieldOptions]) -> String {
        if peekable.is_empty() {
            return String::new();
        }
        let mut hints = String::from("## Known values\n\n");
        hints.push_str(
            "Use one of these values (or its label) for the listed fields instead of guessing.\n\n",
        );
        for field in peekable {
            hints.push_str(&format!("### {} `{}`\n", field.tool_name, field.field));
            for option in &field.options {
                if option.label == option.value {
                    hints.push_str(&format!("- {}\n", option.value));
                } else {
                    hints.push_str(&format!("- {} (id: {})\n", option.label, option.value));
                }
            }
            hints.push('\n');
        }
        hints
    }
}
