#![allow(clippy::result_large_err)]

//! Tool discovery, schema generation and single tool-call execution.

pub mod peek;
pub mod schema;

pub use peek::{match_peek_item, resolve_peek_value, PeekOption, PeekableFieldOptions};
pub use schema::{action_parameters_schema, property_schema, tool_name};

use crate::core::error::AppError;
use crate::core::events::{single_items, NodeEventEmitter};
use crate::core::integration::{
    ActionDefinition, IntegrationCatalog, IntegrationInput, IntegrationOutput, PeekRequest,
    PeekableSpec, ToolExecutor, AGENT_INPUT_ID,
};
use crate::core::llm::LlmToolSpec;
use crate::core::settings::resolver::{is_reserved_key, ParameterResolver};
use crate::core::types::ErrorCategory;
use conduit_types::{
    ParameterResolution, ToolCallRequest, ToolExecutionRecord, ToolIdentity,
};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Tool results longer than this are truncated before reaching the model.
const TOOL_RESULT_LIMIT_CHARS: usize = 20_000;

/// A callable tool derived from one action of a bound integration.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub action: ActionDefinition,
    pub executor: ToolExecutor,
}

impl ToolDefinition {
    pub fn identity(&self) -> ToolIdentity {
        self.executor.identity(&self.action.action_type)
    }

    pub fn spec(&self) -> LlmToolSpec {
        LlmToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Outcome of one model-issued tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub arguments: Map<String, Value>,
    pub resolved_settings: Map<String, Value>,
    pub resolution_log: Vec<ParameterResolution>,
    pub tool_identity: Option<ToolIdentity>,
}

impl ToolCallResult {
    fn failure(call: &ToolCallRequest, error: String, started: Instant) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: false,
            content: String::new(),
            error: Some(error),
            duration_ms: started.elapsed().as_millis() as u64,
            arguments: call.arguments.clone(),
            resolved_settings: Map::new(),
            resolution_log: Vec::new(),
            tool_identity: None,
        }
    }

    /// Result for a call that was never executed because the round was cut short.
    pub fn skipped(call: &ToolCallRequest, reason: &str) -> Self {
        Self::failure(call, format!("skipped, {}", reason), Instant::now())
    }

    /// Content of the tool-result message returned to the model.
    pub fn message_content(&self) -> String {
        match (&self.error, self.success) {
            (Some(error), false) => format!("Error: {}", error),
            _ => self.content.clone(),
        }
    }

    pub fn to_record(&self, round: u32) -> ToolExecutionRecord {
        ToolExecutionRecord {
            tool_call_id: self.tool_call_id.clone(),
            tool_name: self.tool_name.clone(),
            arguments: self.arguments.clone(),
            success: self.success,
            result: self.success.then(|| self.content.clone()),
            error: self.error.clone(),
            duration_ms: self.duration_ms,
            round,
            tool_identity: self.tool_identity.clone(),
            executed_at: chrono::Utc::now(),
        }
    }
}

pub struct ToolCallManager {
    catalog: Arc<dyn IntegrationCatalog>,
    resolver: ParameterResolver,
}

impl ToolCallManager {
    pub fn new(catalog: Arc<dyn IntegrationCatalog>) -> Self {
        Self {
            catalog,
            resolver: ParameterResolver::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: ParameterResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Enumerate callable tools for the bound executors.
    ///
    /// A catalogue failure for one executor is logged and skipped; discovery
    /// only fails when executors are bound but no tool could be produced.
    pub async fn discover_tools(
        &self,
        executors: &[ToolExecutor],
    ) -> Result<Vec<ToolDefinition>, AppError> {
        let mut tools: IndexMap<String, ToolDefinition> = IndexMap::new();
        let mut last_error: Option<AppError> = None;

        for executor in executors {
            let actions = match self.catalog.actions(&executor.integration_type).await {
                Ok(actions) => actions,
                Err(err) => {
                    tracing::warn!(
                        integration = %executor.integration_type,
                        node_id = %executor.node_id,
                        error = %err,
                        "failed to load integration actions"
                    );
                    last_error = Some(err);
                    continue;
                }
            };

            for allowed in &executor.allowed_actions {
                if !actions
                    .iter()
                    .any(|action| action.action_type.eq_ignore_ascii_case(allowed))
                {
                    tracing::warn!(
                        integration = %executor.integration_type,
                        action = %allowed,
                        "allowed action is not offered by the integration"
                    );
                }
            }

            for action in actions
                .into_iter()
                .filter(|action| executor.allows_action(&action.action_type))
            {
                let definition = self.build_definition(executor, action);
                tracing::debug!(tool = %definition.name, node_id = %executor.node_id, "discovered tool");
                if let Some(previous) = tools.insert(definition.name.clone(), definition) {
                    tracing::warn!(
                        tool = %previous.name,
                        previous_node = %previous.executor.node_id,
                        "tool name collision; last discovered executor wins"
                    );
                }
            }
        }

        if tools.is_empty() && !executors.is_empty() {
            let mut error = AppError::new(
                ErrorCategory::ToolDiscoveryError,
                "no callable tools could be discovered for the bound executors",
            )
            .with_code("AGT-DISC-002");
            if let Some(cause) = last_error {
                error.add_context("cause", &cause.to_string());
            }
            return Err(error);
        }

        Ok(tools.into_values().collect())
    }

    fn build_definition(&self, executor: &ToolExecutor, action: ActionDefinition) -> ToolDefinition {
        let name = tool_name(&executor.integration_type, &action.action_type);
        let mut description = if action.description.is_empty() {
            format!("{} {}", executor.integration_type, action.action_type)
        } else {
            action.description.clone()
        };
        if let Some(node) = &executor.node {
            if !node.name.is_empty() {
                description = format!("{} (workflow node '{}')", description, node.name);
            }
        }
        let parameters = action_parameters_schema(&action, executor.node.as_ref());
        ToolDefinition {
            name,
            description,
            parameters,
            action,
            executor: executor.clone(),
        }
    }

    /// Look up a tool by name, tolerating provider namespacing such as
    /// `functions.http_get` or `default_api:http_get`.
    pub fn find_tool<'a>(&self, name: &str, tools: &'a [ToolDefinition]) -> Option<&'a ToolDefinition> {
        if let Some(tool) = tools.iter().find(|tool| tool.name == name) {
            return Some(tool);
        }
        let bare = name
            .rsplit(|c| c == '.' || c == ':' || c == '/')
            .next()
            .unwrap_or(name);
        tools
            .iter()
            .find(|tool| tool.name.eq_ignore_ascii_case(bare))
    }

    /// Execute one tool call end to end. Tool failures are returned as
    /// unsuccessful results; only cancellation is returned as an error.
    pub async fn execute_tool_call(
        &self,
        call: &ToolCallRequest,
        tools: &[ToolDefinition],
        emitter: &NodeEventEmitter,
        cancel: &CancellationToken,
    ) -> Result<ToolCallResult, AppError> {
        let started = Instant::now();
        let Some(tool) = self.find_tool(&call.name, tools) else {
            tracing::warn!(tool = %call.name, "model requested an unknown tool");
            return Ok(ToolCallResult::failure(
                call,
                format!("tool '{}' not found", call.name),
                started,
            ));
        };

        let node_id = tool.executor.node_id.as_str();
        emitter.started(node_id).await;

        let resolution = match self
            .resolver
            .resolve_for_node(tool.executor.node.as_ref(), &call.arguments)
        {
            Ok(resolution) => resolution,
            Err(err) => {
                emitter
                    .failed(
                        node_id,
                        &err.message,
                        single_items(AGENT_INPUT_ID, Value::Object(call.arguments.clone())),
                    )
                    .await;
                let mut result = ToolCallResult::failure(call, err.to_string(), started);
                result.tool_identity = Some(tool.identity());
                return Ok(result);
            }
        };
        for ignored in resolution.ignored_ai_values() {
            tracing::info!(tool = %tool.name, field = %ignored.path, "AI value for unauthorized field was not applied");
        }

        let settings = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                emitter.failed(node_id, "cancelled", Default::default()).await;
                return Err(cancelled(&tool.name));
            }
            settings = self.resolve_peekable_fields(tool, resolution.resolved_settings.clone()) => settings,
        };

        let inputs = single_items(AGENT_INPUT_ID, Value::Object(settings.clone()));
        let input = IntegrationInput {
            action_type: tool.action.action_type.clone(),
            workspace_id: tool.executor.workspace_id.clone(),
            node_id: node_id.to_string(),
            credential_id: tool.executor.credential_id.clone(),
            settings: settings.clone(),
            payload_by_input_id: inputs.clone(),
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                emitter.failed(node_id, "cancelled", inputs).await;
                return Err(cancelled(&tool.name));
            }
            outcome = tool.executor.executor.execute(input) => outcome,
        };

        let mut result = ToolCallResult {
            tool_call_id: call.id.clone(),
            tool_name: tool.name.clone(),
            success: false,
            content: String::new(),
            error: None,
            duration_ms: 0,
            arguments: call.arguments.clone(),
            resolved_settings: settings,
            resolution_log: resolution.resolution_log,
            tool_identity: Some(tool.identity()),
        };

        match outcome {
            Ok(output) => {
                result.success = true;
                result.content = format_output(&output);
                emitter
                    .executed(node_id, inputs, output.items_by_output())
                    .await;
            }
            Err(err) => {
                tracing::warn!(tool = %tool.name, node_id = %node_id, error = %err, "tool execution failed");
                emitter.failed(node_id, &err.message, inputs).await;
                result.error = Some(err.message);
            }
        }
        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Translate labels in agent-authorized peekable fields into identifiers.
    async fn resolve_peekable_fields(
        &self,
        tool: &ToolDefinition,
        mut settings: Map<String, Value>,
    ) -> Map<String, Value> {
        let (Some(peeker), Some(node)) = (tool.executor.executor.as_peekable(), tool.executor.node.as_ref())
        else {
            return settings;
        };

        for property in &tool.action.properties {
            let Some(spec) = &property.peekable else {
                continue;
            };
            if !node.authorizes_root(&property.key) {
                continue;
            }
            let Some(current) = settings.get(&property.key).cloned() else {
                continue;
            };
            if !matches!(current, Value::String(_) | Value::Array(_)) {
                continue;
            }

            let request = self.peek_request(tool, spec, &settings);
            match peeker.peek(request).await {
                Ok(items) => {
                    let resolved = resolve_peek_value(&current, &items);
                    if resolved != current {
                        tracing::debug!(tool = %tool.name, field = %property.key, "resolved peekable label");
                    }
                    settings.insert(property.key.clone(), resolved);
                }
                Err(err) => {
                    tracing::warn!(
                        tool = %tool.name,
                        field = %property.key,
                        error = %err,
                        "peek lookup failed; keeping provided value"
                    );
                }
            }
        }
        settings
    }

    fn peek_request(
        &self,
        tool: &ToolDefinition,
        spec: &PeekableSpec,
        settings: &Map<String, Value>,
    ) -> PeekRequest {
        let payload = if spec.depends_on.is_empty() {
            settings.clone()
        } else {
            spec.depends_on
                .iter()
                .filter_map(|key| settings.get(key).map(|value| (key.clone(), value.clone())))
                .collect()
        };
        PeekRequest {
            peekable_type: spec.peekable_type.clone(),
            workspace_id: tool.executor.workspace_id.clone(),
            credential_id: tool.executor.credential_id.clone(),
            payload,
        }
    }

    /// Options for every agent-authorized peekable field, for prompt injection.
    pub async fn get_peekable_data(&self, tools: &[ToolDefinition]) -> Vec<PeekableFieldOptions> {
        let mut fields = Vec::new();
        for tool in tools {
            let (Some(peeker), Some(node)) = (tool.executor.executor.as_peekable(), tool.executor.node.as_ref())
            else {
                continue;
            };
            let presets: Map<String, Value> = node
                .settings
                .iter()
                .filter(|(key, _)| !is_reserved_key(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();

            for property in &tool.action.properties {
                let Some(spec) = &property.peekable else {
                    continue;
                };
                if !node.authorizes_root(&property.key) {
                    continue;
                }
                match peeker.peek(self.peek_request(tool, spec, &presets)).await {
                    Ok(items) => {
                        let options: Vec<PeekOption> = items
                            .iter()
                            .take(peek::MAX_PEEK_OPTIONS)
                            .map(PeekOption::from)
                            .collect();
                        if options.is_empty() {
                            continue;
                        }
                        fields.push(PeekableFieldOptions {
                            tool_name: tool.name.clone(),
                            field: property.key.clone(),
                            peekable_type: spec.peekable_type.clone(),
                            options,
                        });
                    }
                    Err(err) => {
                        tracing::warn!(
                            tool = %tool.name,
                            field = %property.key,
                            error = %err,
                            "could not load peekable options"
                        );
                    }
                }
            }
        }
        fields
    }
}

fn cancelled(tool_name: &str) -> AppError {
    AppError::new(ErrorCategory::CancelledError, "tool call cancelled")
        .with_code("AGT-CANCEL-001")
        .with_context("tool", tool_name)
}

/// Result text for the model: the decoded JSON payload when there is one,
/// otherwise the raw output as a lossy string.
pub fn format_output(output: &IntegrationOutput) -> String {
    let text = match output.payloads_by_output_index.len() {
        0 => return "Tool executed successfully with no output".to_string(),
        1 => {
            let payload = output
                .payloads_by_output_index
                .values()
                .next()
                .map(Vec::as_slice)
                .unwrap_or_default();
            decode_payload(payload)
        }
        _ => {
            let combined: Map<String, Value> = output
                .payloads_by_output_index
                .iter()
                .map(|(index, payload)| {
                    let value = serde_json::from_slice(payload).unwrap_or_else(|_| {
                        Value::String(String::from_utf8_lossy(payload).into_owned())
                    });
                    (format!("output_{}", index), value)
                })
                .collect();
            Value::Object(combined).to_string()
        }
    };
    truncate_chars(text, TOOL_RESULT_LIMIT_CHARS)
}

fn decode_payload(payload: &[u8]) -> String {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::String(inner)) => inner,
        Ok(value) => value.to_string(),
        Err(_) => String::from_utf8_lossy(payload).into_owned(),
    }
}

fn truncate_chars(text: String, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}... (truncated)", &text[..cut]),
        None => text,
    }
}
