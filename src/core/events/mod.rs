//! Node execution events consumed by execution-history views.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Keys whose values are masked before events leave the core.
pub const DEFAULT_REDACT_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "private_key",
];

pub type ItemsById = HashMap<String, Vec<Value>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    NodeExecutionStarted {
        node_id: String,
        execution_index: u32,
        timestamp: DateTime<Utc>,
    },
    NodeExecuted {
        node_id: String,
        execution_index: u32,
        items_by_input: ItemsById,
        items_by_output: ItemsById,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        node_id: String,
        execution_index: u32,
        error: String,
        items_by_input: ItemsById,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn node_id(&self) -> &str {
        match self {
            ExecutionEvent::NodeExecutionStarted { node_id, .. }
            | ExecutionEvent::NodeExecuted { node_id, .. }
            | ExecutionEvent::NodeFailed { node_id, .. } => node_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionEvent::NodeExecutionStarted { .. } => "started",
            ExecutionEvent::NodeExecuted { .. } => "executed",
            ExecutionEvent::NodeFailed { .. } => "failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Publisher error: {0}")]
    Backend(String),
}

/// Sink for execution events. Failures are logged by callers, never fatal.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ExecutionEvent) -> Result<(), PublishError>;
}

pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _event: ExecutionEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Publisher that forwards events into an unbounded channel.
#[derive(Clone)]
pub struct ChannelEventPublisher {
    event_tx: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelEventPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (Self { event_tx }, event_rx)
    }
}

#[async_trait]
impl EventPublisher for ChannelEventPublisher {
    async fn publish(&self, event: ExecutionEvent) -> Result<(), PublishError> {
        self.event_tx
            .send(event)
            .map_err(|_| PublishError::ChannelClosed)
    }
}

/// Emits started/executed/failed triads for one agent run.
///
/// Execution counters are owned by the emitter, so each run starts at zero.
pub struct NodeEventEmitter {
    publisher: Arc<dyn EventPublisher>,
    counters: Mutex<HashMap<String, u32>>,
    redact_keys: Vec<String>,
}

impl NodeEventEmitter {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            publisher,
            counters: Mutex::new(HashMap::new()),
            redact_keys: DEFAULT_REDACT_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn with_redact_keys(mut self, redact_keys: Vec<String>) -> Self {
        self.redact_keys = redact_keys;
        self
    }

    /// Number of started executions recorded for the node in this run.
    pub fn execution_count(&self, node_id: &str) -> u32 {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(node_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn started(&self, node_id: &str) -> u32 {
        let execution_index = {
            let mut counters = self
                .counters
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let entry = counters.entry(node_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        self.publish(ExecutionEvent::NodeExecutionStarted {
            node_id: node_id.to_string(),
            execution_index,
            timestamp: Utc::now(),
        })
        .await;
        execution_index
    }

    pub async fn executed(&self, node_id: &str, items_by_input: ItemsById, items_by_output: ItemsById) {
        self.publish(ExecutionEvent::NodeExecuted {
            node_id: node_id.to_string(),
            execution_index: self.execution_count(node_id),
            items_by_input: self.redact(items_by_input),
            items_by_output: self.redact(items_by_output),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn failed(&self, node_id: &str, error: &str, items_by_input: ItemsById) {
        self.publish(ExecutionEvent::NodeFailed {
            node_id: node_id.to_string(),
            execution_index: self.execution_count(node_id),
            error: error.to_string(),
            items_by_input: self.redact(items_by_input),
            timestamp: Utc::now(),
        })
        .await;
    }

    async fn publish(&self, event: ExecutionEvent) {
        let node_id = event.node_id().to_string();
        let kind = event.kind();
        if let Err(err) = self.publisher.publish(event).await {
            tracing::warn!(node_id = %node_id, kind, error = %err, "failed to publish execution event");
        }
    }

    fn redact(&self, mut items: ItemsById) -> ItemsById {
        if self.redact_keys.is_empty() {
            return items;
        }
        for values in items.values_mut() {
            for value in values.iter_mut() {
                redact_value(value, &self.redact_keys);
            }
        }
        items
    }
}

/// Build an items map holding a single input or output.
pub fn single_items(id: &str, value: Value) -> ItemsById {
    let mut items = HashMap::new();
    items.insert(id.to_string(), vec![value]);
    items
}

/// Redact sensitive keys in the given JSON value.
pub fn redact_value(value: &mut Value, redact_keys: &[String]) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if should_redact(key, redact_keys) {
                    *child = Value::String("[REDACTED]".to_string());
                    continue;
                }
                redact_value(child, redact_keys);
            }
        }
        Value::Array(items) => {
            for item in items {
                redact_value(item, redact_keys);
            }
        }
        _ => {}
    }
}

/// Qualifiers that turn a sensitive-looking name into a pagination cursor,
/// e.g. `page_token` or `nextToken`.
const CURSOR_QUALIFIERS: &[&str] = &["page", "next", "continuation", "cursor"];

// A key is redacted when its trailing word segments spell a redact pattern,
// so `access_token` and `X-Api-Key` match while `max_tokens` does not.
fn should_redact(key: &str, redact_keys: &[String]) -> bool {
    let segments = key_segments(key);
    redact_keys.iter().any(|pattern| {
        let pattern: String = key_segments(pattern).concat();
        (0..segments.len()).any(|start| {
            segments[start..].concat() == pattern
                && (start == 0 || !CURSOR_QUALIFIERS.contains(&segments[start - 1].as_str()))
        })
    })
}

/// Lower-cased words of a key, split on separators and camelCase boundaries.
fn key_segments(key: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut previous_lower = false;
    for c in key.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            previous_lower = false;
            continue;
        }
        if c.is_uppercase() && previous_lower && !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
        previous_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}
