use crate::core::settings::path::{get_path, set_path};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// How an agent-provided value combines with a preset value at the same path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayMergeStrategy {
    /// Arrays are concatenated with the agent's items first; anything else is replaced.
    #[default]
    Append,
    /// The agent's value always replaces the preset value.
    Replace,
}

impl ArrayMergeStrategy {
    pub fn merge_values(&self, existing: &Value, incoming: &Value) -> Value {
        match (self, existing, incoming) {
            (ArrayMergeStrategy::Append, Value::Array(current), Value::Array(added)) => {
                let mut merged = Vec::with_capacity(current.len() + added.len());
                merged.extend(added.iter().cloned());
                merged.extend(current.iter().cloned());
                Value::Array(merged)
            }
            _ => incoming.clone(),
        }
    }
}

impl FromStr for ArrayMergeStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "append" => Ok(ArrayMergeStrategy::Append),
            "replace" => Ok(ArrayMergeStrategy::Replace),
            _ => Err(format!(
                "invalid array merge strategy '{}'; supported values are append, replace",
                value
            )),
        }
    }
}

/// Path-based merge of agent values into a preset settings tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsMerger {
    strategy: ArrayMergeStrategy,
}

impl SettingsMerger {
    pub fn new(strategy: ArrayMergeStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ArrayMergeStrategy {
        self.strategy
    }

    /// Merge `ai_values` into a copy of `preset` for the authorized paths only.
    /// `preset` is never modified.
    pub fn merge(
        &self,
        preset: &Map<String, Value>,
        authorized_paths: &[String],
        ai_values: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut merged = preset.clone();
        for path in authorized_paths {
            let Some(incoming) = lookup_ai_value(ai_values, path) else {
                continue;
            };
            let value = match get_path(preset, path) {
                Some(existing) => self.strategy.merge_values(existing, incoming),
                None => incoming.clone(),
            };
            if let Err(err) = set_path(&mut merged, path, value) {
                tracing::warn!(path = %path, error = %err, "skipping authorized path during merge");
            }
        }
        merged
    }
}

/// AI arguments may arrive nested (`{"body": {"title": ..}}`) or flat, keyed
/// by the full path (`{"body.title": ..}`). Nested wins when both are present.
pub(crate) fn lookup_ai_value<'a>(ai_values: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    get_path(ai_values, path).or_else(|| ai_values.get(path))
}
