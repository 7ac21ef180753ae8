#![allow(clippy::result_large_err)]

//! The function-calling round loop: LLM call, tool execution, repeat.

pub mod prompt;
pub mod result;

pub use prompt::PromptBuilder;
pub use result::{final_response, ConversationResult};

use crate::core::config::{AgentConfig, ConversationConfig, StateConfig};
use crate::core::error::AppError;
use crate::core::events::{single_items, EventPublisher, NodeEventEmitter, NoopEventPublisher};
use crate::core::integration::{IntegrationCatalog, StaticCatalog, ToolExecutor};
use crate::core::llm::{
    GenerateRequest, GenerateResponse, LlmProvider, LlmToolSpec, ProviderError, StreamObserver,
};
use crate::core::memory::{MemoryManager, NoopMemoryManager};
use crate::core::settings::ParameterResolver;
use crate::core::state::{InMemoryStateManager, StateManager};
use crate::core::tools::{ToolCallManager, ToolCallResult, ToolDefinition};
use crate::core::types::ErrorCategory;
use conduit_types::{
    AgentConversation, ConversationMessage, ConversationMetadata, ConversationState,
    ConversationStatus, ConversationStep, ToolCallRequest,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DEFAULT_LLM_NODE_ID: &str = "llm";

/// Input of one agent-node execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRequest {
    pub prompt: String,
    pub workspace_id: String,
    /// Resume key; a fresh ID is generated when absent.
    pub conversation_id: Option<String>,
    /// Memory session; defaults to the conversation ID.
    pub session_id: Option<String>,
}

impl ConversationRequest {
    pub fn new(prompt: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            workspace_id: workspace_id.into(),
            conversation_id: None,
            session_id: None,
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Per-run bookkeeping that does not belong in the persisted state.
struct RunContext<'a> {
    request: &'a ConversationRequest,
    conversation_id: String,
    emitter: NodeEventEmitter,
    cancel: CancellationToken,
    started: Instant,
}

impl RunContext<'_> {
    fn session_id(&self) -> String {
        self.request
            .session_id
            .clone()
            .unwrap_or_else(|| self.conversation_id.clone())
    }
}

pub struct ConversationManager {
    llm: Arc<dyn LlmProvider>,
    llm_node_id: String,
    memory: Arc<dyn MemoryManager>,
    tool_executors: Vec<ToolExecutor>,
    tool_manager: ToolCallManager,
    state_manager: Arc<dyn StateManager>,
    publisher: Arc<dyn EventPublisher>,
    stream_observer: Option<Arc<dyn StreamObserver>>,
    config: ConversationConfig,
    state_config: StateConfig,
}

impl ConversationManager {
    pub fn builder() -> ConversationManagerBuilder {
        ConversationManagerBuilder::default()
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    pub async fn run(&self, request: ConversationRequest) -> Result<ConversationResult, AppError> {
        self.run_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Drive the round loop until completion, the round cap, or a fatal error.
    pub async fn run_with_cancellation(
        &self,
        request: ConversationRequest,
        cancel: CancellationToken,
    ) -> Result<ConversationResult, AppError> {
        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let run = RunContext {
            request: &request,
            conversation_id,
            emitter: NodeEventEmitter::new(self.publisher.clone()),
            cancel,
            started: Instant::now(),
        };

        let mut state = self.initialize_state(&run).await?;
        tracing::info!(
            conversation_id = %state.conversation_id,
            workspace_id = %state.workspace_id,
            round = state.round,
            executors = self.tool_executors.len(),
            "starting agent conversation"
        );
        self.memory
            .store_start(&self.memory_record(&state, &run), &run.emitter)
            .await;

        let tools = match self.tool_manager.discover_tools(&self.tool_executors).await {
            Ok(tools) => tools,
            Err(err) => return Err(self.fail_run(&mut state, &run, err).await),
        };
        let tool_specs: Vec<LlmToolSpec> = tools.iter().map(ToolDefinition::spec).collect();
        let system_prompt = self.system_prompt(&tools, &state.workspace_id, &run).await;

        let mut hit_round_limit = false;
        loop {
            if state.current_step == ConversationStep::Completed {
                break;
            }
            if run.cancel.is_cancelled() {
                let err = cancelled_error(state.round);
                return Err(self.fail_run(&mut state, &run, err).await);
            }
            if state.tool_failures >= self.config.max_tool_failures {
                let err = failure_cap_error(self.config.max_tool_failures, 0);
                return Err(self.fail_run(&mut state, &run, err).await);
            }
            if state.round >= self.config.max_rounds {
                tracing::warn!(
                    conversation_id = %state.conversation_id,
                    max_rounds = self.config.max_rounds,
                    "round limit reached; completing with partial result"
                );
                hit_round_limit = true;
                state.current_step = ConversationStep::Completed;
                break;
            }

            let step = state.current_step;
            let outcome = match step {
                ConversationStep::LlmCall => {
                    self.llm_step(&mut state, &system_prompt, &tool_specs, &run)
                        .await
                }
                ConversationStep::ToolExecution => self.tool_step(&mut state, &tools, &run).await,
                ConversationStep::Completed => Ok(()),
            };

            if let Err(mut err) = outcome {
                err.add_context("round", &state.round.to_string());
                err.add_context("step", step.as_str());
                if is_fatal(&err) || state.tool_failures >= self.config.max_tool_failures {
                    return Err(self.fail_run(&mut state, &run, err).await);
                }
                tracing::warn!(
                    conversation_id = %state.conversation_id,
                    round = state.round,
                    step = step.as_str(),
                    tool_failures = state.tool_failures,
                    error = %err,
                    "step failed; completing with partial result"
                );
                state.last_error = Some(err.snapshot(state.round, step, true));
                state.current_step = ConversationStep::Completed;
            }

            state.touch();
            self.save_step(&state).await;
        }

        state.status = ConversationStatus::Completed;
        state.touch();
        self.save_final(&state).await;

        let result = ConversationResult::from_state(&state, hit_round_limit, run.started.elapsed());
        let mut record = self.memory_record(&state, &run);
        record.final_response = result.final_response.clone();
        self.memory.store_complete(&record, &run.emitter).await;

        tracing::info!(
            conversation_id = %result.conversation_id,
            rounds = result.rounds,
            tool_executions = result.tool_executions.len(),
            tool_failures = result.tool_failures,
            hit_round_limit,
            duration_ms = result.duration_ms,
            "agent conversation completed"
        );
        Ok(result)
    }

    /// Load the state to resume, or start a fresh one, and persist it.
    async fn initialize_state(&self, run: &RunContext<'_>) -> Result<ConversationState, AppError> {
        let loaded = self
            .state_manager
            .load(&run.conversation_id)
            .await
            .map_err(|err| state_init_error(&run.conversation_id, err))?;

        let state = match loaded {
            Some(mut state) if !state.status.is_terminal() => {
                tracing::info!(
                    conversation_id = %state.conversation_id,
                    round = state.round,
                    step = state.current_step.as_str(),
                    "resuming conversation"
                );
                state.status = ConversationStatus::Running;
                if state.conversation_history.is_empty() {
                    state.push_message(ConversationMessage::user(run.request.prompt.clone()));
                }
                state
            }
            Some(mut state) => {
                tracing::info!(
                    conversation_id = %state.conversation_id,
                    "continuing finished conversation with a new turn"
                );
                state.status = ConversationStatus::Running;
                state.current_step = ConversationStep::LlmCall;
                state.round = 0;
                state.tool_failures = 0;
                state.last_error = None;
                state.push_message(ConversationMessage::user(run.request.prompt.clone()));
                state
            }
            None => {
                if run.request.prompt.trim().is_empty() {
                    return Err(AppError::new(
                        ErrorCategory::ValidationError,
                        "conversation prompt cannot be empty",
                    )
                    .with_code("AGT-INIT-003"));
                }
                let mut state =
                    ConversationState::new(run.conversation_id.clone(), run.request.workspace_id.clone());
                state.push_message(ConversationMessage::user(run.request.prompt.clone()));
                state
            }
        };

        self.state_manager
            .save(&state)
            .await
            .map_err(|err| state_init_error(&run.conversation_id, err))?;
        Ok(state)
    }

    async fn system_prompt(
        &self,
        tools: &[ToolDefinition],
        workspace_id: &str,
        run: &RunContext<'_>,
    ) -> String {
        let peekable = self.tool_manager.get_peekable_data(tools).await;
        let prompt = PromptBuilder::build_system_prompt(
            self.config.system_prompt.as_deref(),
            tools,
            &peekable,
        );
        self.memory
            .enhance_system_prompt(&prompt, workspace_id, &run.emitter)
            .await
    }

    async fn llm_step(
        &self,
        state: &mut ConversationState,
        system_prompt: &str,
        tool_specs: &[LlmToolSpec],
        run: &RunContext<'_>,
    ) -> Result<(), AppError> {
        let request = GenerateRequest {
            messages: state.conversation_history.clone(),
            tools: tool_specs.to_vec(),
            system_prompt: system_prompt.to_string(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            model: self.config.model.clone(),
        };
        let inputs = single_items(
            "llm",
            json!({
                "round": state.round,
                "messages": request.messages.len(),
                "tools": request.tools.len(),
            }),
        );

        run.emitter.started(&self.llm_node_id).await;
        match self.generate(request, &run.cancel).await {
            Ok(mut response) => {
                for (index, call) in response.tool_calls.iter_mut().enumerate() {
                    if call.id.trim().is_empty() {
                        call.id = format!("call_{}_{}", state.round, index);
                    }
                }
                let outputs = single_items(
                    "output_0",
                    json!({
                        "content": response.content,
                        "tool_calls": response.tool_calls.iter().map(|call| call.name.as_str()).collect::<Vec<_>>(),
                        "finish_reason": response.finish_reason,
                    }),
                );
                run.emitter
                    .executed(&self.llm_node_id, inputs, outputs)
                    .await;

                tracing::debug!(
                    conversation_id = %state.conversation_id,
                    round = state.round,
                    tool_calls = response.tool_calls.len(),
                    "llm responded"
                );
                state.current_step = if response.tool_calls.is_empty() {
                    ConversationStep::Completed
                } else {
                    ConversationStep::ToolExecution
                };
                state.push_message(ConversationMessage::assistant(
                    response.content,
                    response.tool_calls,
                ));
                Ok(())
            }
            Err(err) => {
                run.emitter
                    .failed(&self.llm_node_id, &err.message, inputs)
                    .await;
                if !err.is_cancellation() {
                    state.tool_failures += 1;
                }
                Err(err)
            }
        }
    }

    /// Call the provider under the timeout. With a stream observer, chunks are
    /// forwarded by a consumer task that is joined before returning.
    async fn generate(
        &self,
        request: GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerateResponse, AppError> {
        let timeout = self.config.llm_timeout();

        let (chunks, consumer) = match &self.stream_observer {
            Some(observer) => {
                let (chunk_tx, mut chunk_rx) = mpsc::channel(self.config.stream_buffer.max(1));
                let observer = observer.clone();
                let consumer = tokio::spawn(async move {
                    while let Some(chunk) = chunk_rx.recv().await {
                        observer.on_chunk(chunk).await;
                    }
                });
                (Some(chunk_tx), Some(consumer))
            }
            None => (None, None),
        };

        let llm = self.llm.clone();
        let generation = async move {
            match chunks {
                Some(chunk_tx) => llm.generate_stream(request, chunk_tx).await,
                None => llm.generate(request).await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled_error(0)),
            outcome = tokio::time::timeout(timeout, generation) => match outcome {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Err(provider_error(err)),
                Err(_) => Err(provider_error(ProviderError::Timeout(timeout))),
            },
        };

        if let Some(consumer) = consumer {
            if let Err(err) = consumer.await {
                tracing::warn!(error = %err, "stream consumer task failed");
            }
        }
        outcome
    }

    /// Run every tool call of the last assistant message in request order.
    async fn tool_step(
        &self,
        state: &mut ConversationState,
        tools: &[ToolDefinition],
        run: &RunContext<'_>,
    ) -> Result<(), AppError> {
        let calls = state
            .last_assistant_message()
            .map(|message| message.tool_calls.clone())
            .unwrap_or_default();

        for (index, call) in calls.iter().enumerate() {
            if run.cancel.is_cancelled() {
                answer_skipped(state, &calls[index..], "conversation cancelled");
                return Err(cancelled_error(state.round));
            }
            let result = match self
                .tool_manager
                .execute_tool_call(call, tools, &run.emitter, &run.cancel)
                .await
            {
                Ok(result) => result,
                Err(err) => {
                    answer_skipped(state, &calls[index..], "conversation cancelled");
                    return Err(err);
                }
            };

            if result.success {
                tracing::debug!(tool = %result.tool_name, duration_ms = result.duration_ms, "tool call succeeded");
            } else {
                state.tool_failures += 1;
                tracing::warn!(
                    conversation_id = %state.conversation_id,
                    round = state.round,
                    tool = %result.tool_name,
                    tool_failures = state.tool_failures,
                    error = result.error.as_deref().unwrap_or_default(),
                    "tool call failed"
                );
            }
            state.tool_executions.push(result.to_record(state.round));
            state.push_message(ConversationMessage::tool_result(
                result.tool_call_id.clone(),
                result.tool_name.clone(),
                result.message_content(),
            ));

            if state.tool_failures >= self.config.max_tool_failures {
                let skipped = calls.len() - index - 1;
                answer_skipped(state, &calls[index + 1..], "tool failure limit reached");
                state.current_step = ConversationStep::Completed;
                return Err(failure_cap_error(self.config.max_tool_failures, skipped));
            }
        }

        state.round += 1;
        state.current_step = ConversationStep::LlmCall;
        Ok(())
    }

    async fn fail_run(
        &self,
        state: &mut ConversationState,
        run: &RunContext<'_>,
        mut err: AppError,
    ) -> AppError {
        err.add_context("conversation_id", &state.conversation_id);
        tracing::error!(
            conversation_id = %state.conversation_id,
            round = state.round,
            step = state.current_step.as_str(),
            error = %err,
            "agent conversation failed"
        );

        state.last_error = Some(err.snapshot(state.round, state.current_step, false));
        state.status = ConversationStatus::Failed;
        state.current_step = ConversationStep::Completed;
        state.touch();
        self.save_final(state).await;

        let mut record = self.memory_record(state, run);
        record.final_response = err.message.clone();
        self.memory.store_complete(&record, &run.emitter).await;
        err
    }

    async fn save_step(&self, state: &ConversationState) {
        if let Err(err) = self.state_manager.save(state).await {
            tracing::warn!(
                conversation_id = %state.conversation_id,
                round = state.round,
                error = %err,
                "failed to save conversation state"
            );
        }
    }

    /// Persist the final state, retrying a bounded number of times.
    async fn save_final(&self, state: &ConversationState) -> bool {
        let attempts = self.state_config.save_attempts.max(1);
        let backoff = self.state_config.save_backoff();
        for attempt in 1..=attempts {
            match self.state_manager.save(state).await {
                Ok(()) => return true,
                Err(err) => {
                    tracing::warn!(
                        conversation_id = %state.conversation_id,
                        attempt,
                        attempts,
                        error = %err,
                        "failed to save final conversation state"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        tracing::error!(conversation_id = %state.conversation_id, "final conversation state was not saved");
        false
    }

    fn memory_record(&self, state: &ConversationState, run: &RunContext<'_>) -> AgentConversation {
        let mut tools_used: Vec<String> = Vec::new();
        for record in &state.tool_executions {
            if !tools_used.contains(&record.tool_name) {
                tools_used.push(record.tool_name.clone());
            }
        }
        AgentConversation {
            conversation_id: state.conversation_id.clone(),
            session_id: run.session_id(),
            workspace_id: state.workspace_id.clone(),
            messages: state.conversation_history.clone(),
            user_prompt: run.request.prompt.clone(),
            final_response: String::new(),
            tools_used,
            status: state.status,
            metadata: ConversationMetadata {
                rounds: state.round,
                tool_failures: state.tool_failures,
                tool_executions: state.tool_executions.len() as u32,
                execution_time_ms: run.started.elapsed().as_millis() as u64,
            },
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}

/// Answer calls that will not run, so every requested call ID keeps a tool
/// result in request order. Skipped calls do not count as failures.
fn answer_skipped(state: &mut ConversationState, calls: &[ToolCallRequest], reason: &str) {
    for call in calls {
        let result = ToolCallResult::skipped(call, reason);
        state.tool_executions.push(result.to_record(state.round));
        state.push_message(ConversationMessage::tool_result(
            result.tool_call_id.clone(),
            result.tool_name.clone(),
            result.message_content(),
        ));
    }
}

/// Cancellation, structural provider failures and discovery failures end the
/// run regardless of the failure budget.
fn is_fatal(err: &AppError) -> bool {
    err.is_cancellation()
        || err.category == ErrorCategory::ToolDiscoveryError
        || err.context.get("structural").is_some_and(|value| value == "true")
}

fn provider_error(err: ProviderError) -> AppError {
    let category = match &err {
        ProviderError::Timeout(_) => ErrorCategory::TimeoutError,
        _ => ErrorCategory::ProviderError,
    };
    AppError::new(category, err.to_string())
        .with_code(err.code())
        .with_context("structural", err.is_structural().to_string())
}

fn cancelled_error(round: u32) -> AppError {
    AppError::new(ErrorCategory::CancelledError, "conversation cancelled")
        .with_code("AGT-CANCEL-001")
        .with_context("round", round.to_string())
}

fn failure_cap_error(max_tool_failures: u32, skipped_calls: usize) -> AppError {
    AppError::new(
        ErrorCategory::ToolExecutionError,
        format!("tool failure limit of {} reached", max_tool_failures),
    )
    .with_code("AGT-TOOL-002")
    .with_context("skipped_calls", skipped_calls.to_string())
}

fn state_init_error(conversation_id: &str, err: AppError) -> AppError {
    AppError::new(
        ErrorCategory::StateError,
        format!("failed to initialize conversation state: {}", err.message),
    )
    .with_code("AGT-STATE-004")
    .with_context("conversation_id", conversation_id)
}

/// Collects the collaborators of a [`ConversationManager`].
#[derive(Default)]
pub struct ConversationManagerBuilder {
    llm: Option<Arc<dyn LlmProvider>>,
    llm_node_id: Option<String>,
    memory: Option<Arc<dyn MemoryManager>>,
    tool_executors: Vec<ToolExecutor>,
    catalog: Option<Arc<dyn IntegrationCatalog>>,
    tool_manager: Option<ToolCallManager>,
    state_manager: Option<Arc<dyn StateManager>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    stream_observer: Option<Arc<dyn StreamObserver>>,
    config: AgentConfig,
}

impl ConversationManagerBuilder {
    pub fn llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Workflow node the LLM events are attributed to.
    pub fn llm_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.llm_node_id = Some(node_id.into());
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryManager>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn tool_executor(mut self, executor: ToolExecutor) -> Self {
        self.tool_executors.push(executor);
        self
    }

    pub fn tool_executors(mut self, executors: Vec<ToolExecutor>) -> Self {
        self.tool_executors.extend(executors);
        self
    }

    /// Catalogue for a default tool manager configured from the agent config.
    pub fn catalog(mut self, catalog: Arc<dyn IntegrationCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn tool_manager(mut self, tool_manager: ToolCallManager) -> Self {
        self.tool_manager = Some(tool_manager);
        self
    }

    pub fn state_manager(mut self, state_manager: Arc<dyn StateManager>) -> Self {
        self.state_manager = Some(state_manager);
        self
    }

    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn stream_observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.stream_observer = Some(observer);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ConversationManager, AppError> {
        let llm = self.llm.ok_or_else(|| {
            AppError::new(
                ErrorCategory::ValidationError,
                "an LLM provider is required to run the agent",
            )
            .with_code("AGT-INIT-001")
        })?;

        let tool_manager = match (self.tool_manager, self.catalog) {
            (Some(tool_manager), _) => tool_manager,
            (None, Some(catalog)) => ToolCallManager::new(catalog).with_resolver(
                ParameterResolver::new(self.config.tools.array_merge_strategy),
            ),
            (None, None) if self.tool_executors.is_empty() => ToolCallManager::new(Arc::new(StaticCatalog::new())),
            (None, None) => {
                return Err(AppError::new(
                    ErrorCategory::ValidationError,
                    "tool executors are bound but no integration catalog was provided",
                )
                .with_code("AGT-INIT-002"))
            }
        };

        Ok(ConversationManager {
            llm,
            llm_node_id: self
                .llm_node_id
                .unwrap_or_else(|| DEFAULT_LLM_NODE_ID.to_string()),
            memory: self.memory.unwrap_or_else(|| Arc::new(NoopMemoryManager)),
            tool_executors: self.tool_executors,
            tool_manager,
            state_manager: self
                .state_manager
                .unwrap_or_else(|| Arc::new(InMemoryStateManager::new())),
            publisher: self.publisher.unwrap_or_else(|| Arc::new(NoopEventPublisher)),
            stream_observer: self.stream_observer,
            config: self.config.conversation,
            state_config: self.config.state,
        })
    }
}
