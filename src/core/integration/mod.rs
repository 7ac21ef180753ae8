//! Contracts between the agent core and the integrations it exposes as tools.

pub mod catalog;

pub use catalog::{
    ActionDefinition, IntegrationCatalog, PeekableSpec, PropertyDefinition, PropertyOption,
    PropertyType, StaticCatalog,
};

use crate::core::error::AppError;
use crate::core::settings::path::root_key;
use async_trait::async_trait;
use conduit_types::ToolIdentity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Input ID under which the resolved tool settings are handed to the integration.
pub const AGENT_INPUT_ID: &str = "agent";

/// Read-only workflow node metadata owned by the surrounding workflow model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub integration_type: String,
    #[serde(default)]
    pub action_type: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Dotted/indexed settings paths the agent may override.
    #[serde(default)]
    pub agent_authorized_paths: Vec<String>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, integration_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            integration_type: integration_type.into(),
            ..Self::default()
        }
    }

    pub fn with_settings(mut self, settings: Map<String, Value>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_authorized_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agent_authorized_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Whether any authorized path starts at the given top-level settings key.
    pub fn authorizes_root(&self, key: &str) -> bool {
        self.agent_authorized_paths
            .iter()
            .filter_map(|path| root_key(path))
            .any(|root| root == key)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationInput {
    pub action_type: String,
    pub workspace_id: String,
    pub node_id: String,
    pub credential_id: Option<String>,
    pub settings: Map<String, Value>,
    pub payload_by_input_id: HashMap<String, Vec<Value>>,
}

/// Raw result payloads, keyed by output index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationOutput {
    pub payloads_by_output_index: BTreeMap<usize, Vec<u8>>,
}

impl IntegrationOutput {
    pub fn from_json(value: &Value) -> Self {
        let mut payloads = BTreeMap::new();
        payloads.insert(0, value.to_string().into_bytes());
        Self {
            payloads_by_output_index: payloads,
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let mut payloads = BTreeMap::new();
        payloads.insert(0, bytes.into());
        Self {
            payloads_by_output_index: payloads,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payloads_by_output_index.is_empty()
    }

    /// Decode each output into items: JSON arrays spread, other JSON values
    /// become one item, and non-JSON payloads become one string item.
    pub fn items_by_output(&self) -> HashMap<String, Vec<Value>> {
        self.payloads_by_output_index
            .iter()
            .map(|(index, payload)| {
                let items = match serde_json::from_slice::<Value>(payload) {
                    Ok(Value::Array(items)) => items,
                    Ok(value) => vec![value],
                    Err(_) => vec![Value::String(
                        String::from_utf8_lossy(payload).into_owned(),
                    )],
                };
                (format!("output_{}", index), items)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeekRequest {
    pub peekable_type: String,
    pub workspace_id: String,
    pub credential_id: Option<String>,
    pub payload: Map<String, Value>,
}

/// One label/identifier pair returned by a peek lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeekItem {
    pub key: String,
    pub value: String,
    pub content: String,
}

/// Optional capability: look up the concrete identifiers behind human labels.
#[async_trait]
pub trait Peekable: Send + Sync {
    async fn peek(&self, request: PeekRequest) -> Result<Vec<PeekItem>, AppError>;
}

/// Runs one integration action and returns its result payloads.
#[async_trait]
pub trait IntegrationExecutor: Send + Sync {
    async fn execute(&self, input: IntegrationInput) -> Result<IntegrationOutput, AppError>;

    /// Integrations that support label lookups return themselves here.
    fn as_peekable(&self) -> Option<&dyn Peekable> {
        None
    }
}

/// An integration bound to an agent, scoped to one credential, workspace and
/// action allow-list.
#[derive(Clone)]
pub struct ToolExecutor {
    pub integration_type: String,
    pub node_id: String,
    pub workspace_id: String,
    pub credential_id: Option<String>,
    /// Empty means every action of the integration is exposed.
    pub allowed_actions: Vec<String>,
    pub node: Option<WorkflowNode>,
    pub executor: Arc<dyn IntegrationExecutor>,
}

impl ToolExecutor {
    pub fn new(node: WorkflowNode, workspace_id: impl Into<String>, executor: Arc<dyn IntegrationExecutor>) -> Self {
        Self {
            integration_type: node.integration_type.clone(),
            node_id: node.id.clone(),
            workspace_id: workspace_id.into(),
            credential_id: None,
            allowed_actions: Vec::new(),
            node: Some(node),
            executor,
        }
    }

    pub fn with_credential(mut self, credential_id: impl Into<String>) -> Self {
        self.credential_id = Some(credential_id.into());
        self
    }

    pub fn with_allowed_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn allows_action(&self, action_type: &str) -> bool {
        self.allowed_actions.is_empty()
            || self
                .allowed_actions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(action_type))
    }

    pub fn identity(&self, action_type: &str) -> ToolIdentity {
        ToolIdentity {
            node_id: self.node_id.clone(),
            integration_type: self.integration_type.clone(),
            action_type: action_type.to_string(),
        }
    }
}

impl fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("integration_type", &self.integration_type)
            .field("node_id", &self.node_id)
            .field("workspace_id", &self.workspace_id)
            .field("allowed_actions", &self.allowed_actions)
            .field("peekable", &self.executor.as_peekable().is_some())
            .finish()
    }
}
