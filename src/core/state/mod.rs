#![allow(clippy::result_large_err)]

//! Per-conversation state persistence keyed by conversation ID.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use conduit_types::ConversationState;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Stores conversation state between steps. Implementations hand out and keep
/// independent copies, so callers may mutate what they load or saved.
#[async_trait]
pub trait StateManager: Send + Sync {
    async fn save(&self, state: &ConversationState) -> Result<(), AppError>;

    /// `Ok(None)` when the conversation has never been saved.
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>, AppError>;

    async fn delete(&self, conversation_id: &str) -> Result<(), AppError>;
}

/// Process-local store; safe for concurrent runs of distinct conversations.
/// Any conversation ID is accepted.
#[derive(Default)]
pub struct InMemoryStateManager {
    states: DashMap<String, ConversationState>,
}

impl InMemoryStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl StateManager for InMemoryStateManager {
    async fn save(&self, state: &ConversationState) -> Result<(), AppError> {
        self.states
            .insert(state.conversation_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>, AppError> {
        Ok(self
            .states
            .get(conversation_id)
            .map(|entry| entry.value().clone()))
    }

    async fn delete(&self, conversation_id: &str) -> Result<(), AppError> {
        self.states.remove(conversation_id);
        Ok(())
    }
}

/// One JSON document per conversation under `<root>/<conversation_id>.json`.
/// Conversation IDs must be usable as file names, see [`validate_conversation_id`].
pub struct FileStateManager {
    root: PathBuf,
}

impl FileStateManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under `<workspace>/.conduit/state/conversations`.
    pub fn for_workspace(workspace_root: &Path) -> Self {
        Self::new(workspace_root.join(".conduit/state/conversations"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_file(&self, conversation_id: &str) -> Result<PathBuf, AppError> {
        validate_conversation_id(conversation_id)?;
        Ok(self.root.join(format!("{}.json", conversation_id)))
    }
}

#[async_trait]
impl StateManager for FileStateManager {
    async fn save(&self, state: &ConversationState) -> Result<(), AppError> {
        let path = self.state_file(&state.conversation_id)?;
        let content = serde_json::to_vec_pretty(state).map_err(|err| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("failed to serialize conversation state: {}", err),
            )
            .with_code("AGT-STATE-002")
            .with_context("conversation_id", state.conversation_id.as_str())
        })?;
        atomic_write(&path, &content).await
    }

    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>, AppError> {
        let path = self.state_file(conversation_id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AppError::new(
                    ErrorCategory::IoError,
                    format!("failed to read {}: {}", path.display(), err),
                )
                .with_code("AGT-STATE-003"))
            }
        };
        let state = serde_json::from_slice(&bytes).map_err(|err| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("failed to deserialize {}: {}", path.display(), err),
            )
            .with_code("AGT-STATE-002")
        })?;
        Ok(Some(state))
    }

    async fn delete(&self, conversation_id: &str) -> Result<(), AppError> {
        let path = self.state_file(conversation_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::new(
                ErrorCategory::IoError,
                format!("failed to delete {}: {}", path.display(), err),
            )
            .with_code("AGT-STATE-003")),
        }
    }
}

/// Conversation IDs double as file names in [`FileStateManager`].
pub fn validate_conversation_id(conversation_id: &str) -> Result<(), AppError> {
    let valid = !conversation_id.is_empty()
        && conversation_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(AppError::new(
            ErrorCategory::ValidationError,
            "conversation_id contains invalid characters for storage",
        )
        .with_code("AGT-STATE-001")
        .with_context("conversation_id", conversation_id));
    }
    Ok(())
}

async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to create directory {}: {}", parent.display(), err),
            )
            .with_code("AGT-STATE-003")
        })?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data).await.map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to write {}: {}", tmp_path.display(), err),
        )
        .with_code("AGT-STATE-003")
    })?;
    fs::rename(&tmp_path, path).await.map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!(
                "failed to rename {} -> {}: {}",
                tmp_path.display(),
                path.display(),
                err
            ),
        )
        .with_code("AGT-STATE-003")
    })?;
    Ok(())
}
