pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod integration;
pub mod llm;
pub mod memory;
pub mod settings;
pub mod state;
pub mod tools;
pub mod types;

pub use config::{AgentConfig, ConfigLoader};
pub use conversation::{ConversationManager, ConversationRequest, ConversationResult};
pub use error::AppError;
pub use events::{ChannelEventPublisher, EventPublisher, ExecutionEvent, NodeEventEmitter};
pub use integration::{IntegrationExecutor, Peekable, ToolExecutor, WorkflowNode};
pub use llm::{GenerateRequest, GenerateResponse, LlmProvider, ProviderError};
pub use memory::{ConversationStore, MemoryManager, NoopMemoryManager, StoreMemoryManager};
pub use settings::{ArrayMergeStrategy, ParameterResolver, SettingsMerger};
pub use state::{FileStateManager, InMemoryStateManager, StateManager};
pub use tools::{ToolCallManager, ToolCallResult, ToolDefinition};
pub use types::*;
