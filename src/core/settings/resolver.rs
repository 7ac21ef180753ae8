#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::integration::WorkflowNode;
use crate::core::settings::merger::{lookup_ai_value, ArrayMergeStrategy, SettingsMerger};
use crate::core::settings::path::{get_path, parse_path, set_path};
use crate::core::types::ErrorCategory;
use conduit_types::{ParameterResolution, ParameterSource};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Settings keys the agent can never write, whatever the authorization list says.
pub const RESERVED_SETTING_KEYS: &[&str] = &[
    "credential_id",
    "credentialId",
    "node_id",
    "nodeId",
    "integration_type",
    "integrationType",
    "action_type",
    "actionType",
    "tool_call_id",
    "toolCallId",
    "tool_name",
    "toolName",
    "agent_authorized_paths",
    "agentAuthorizedPaths",
];

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_SETTING_KEYS.contains(&key)
}

/// Merged settings plus the per-path provenance audit log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterResolutionResult {
    pub resolved_settings: Map<String, Value>,
    pub resolution_log: Vec<ParameterResolution>,
}

impl ParameterResolutionResult {
    pub fn entry(&self, path: &str) -> Option<&ParameterResolution> {
        self.resolution_log.iter().find(|entry| entry.path == path)
    }

    pub fn count_by_source(&self, source: ParameterSource) -> usize {
        self.resolution_log
            .iter()
            .filter(|entry| entry.was_agent_authorized && entry.source == source)
            .count()
    }

    /// AI-provided values that were observed but not applied.
    pub fn ignored_ai_values(&self) -> impl Iterator<Item = &ParameterResolution> {
        self.resolution_log
            .iter()
            .filter(|entry| !entry.was_agent_authorized)
    }
}

/// Trust boundary between model-proposed arguments and operator presets.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterResolver {
    merger: SettingsMerger,
}

impl ParameterResolver {
    pub fn new(strategy: ArrayMergeStrategy) -> Self {
        Self {
            merger: SettingsMerger::new(strategy),
        }
    }

    pub fn merger(&self) -> &SettingsMerger {
        &self.merger
    }

    /// Resolve against the preset settings of a workflow node.
    pub fn resolve_for_node(
        &self,
        node: Option<&WorkflowNode>,
        ai_arguments: &Map<String, Value>,
    ) -> Result<ParameterResolutionResult, AppError> {
        let node = node.ok_or_else(|| {
            AppError::new(
                ErrorCategory::ValidationError,
                "parameter resolution requires a workflow node context",
            )
            .with_code("AGT-PARAM-001")
        })?;
        Ok(self.resolve(&node.settings, &node.agent_authorized_paths, ai_arguments))
    }

    /// Merge `ai_arguments` into `preset` for the authorized paths. Never fails;
    /// gaps and skipped entries are surfaced through the resolution log.
    pub fn resolve(
        &self,
        preset: &Map<String, Value>,
        authorized_paths: &[String],
        ai_arguments: &Map<String, Value>,
    ) -> ParameterResolutionResult {
        let mut resolved: Map<String, Value> = preset
            .iter()
            .filter(|(key, _)| !is_reserved_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let mut log = Vec::with_capacity(authorized_paths.len());
        let mut covered_roots = HashSet::new();
        let mut covered_paths = HashSet::new();

        for path in authorized_paths {
            let segments = match parse_path(path) {
                Ok(segments) => segments,
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "skipping malformed authorized path");
                    continue;
                }
            };
            let root = &segments[0].key;
            if is_reserved_key(root) {
                tracing::warn!(path = %path, "authorized path targets a reserved key; ignoring");
                continue;
            }
            covered_roots.insert(root.clone());
            covered_paths.insert(path.as_str());

            let preset_value = get_path(preset, path);
            let ai_value = lookup_ai_value(ai_arguments, path).filter(|value| !value.is_null());

            if let Some(incoming) = ai_value {
                let value = match preset_value {
                    Some(existing) => self.merger.strategy().merge_values(existing, incoming),
                    None => incoming.clone(),
                };
                match set_path(&mut resolved, path, value.clone()) {
                    Ok(()) => {
                        log.push(ParameterResolution {
                            path: path.clone(),
                            source: ParameterSource::AiProvided,
                            value,
                            was_agent_authorized: true,
                            ai_value_was_available: true,
                        });
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(path = %path, error = %err, "could not apply AI value; keeping preset");
                    }
                }
            }

            let entry = match preset_value {
                Some(existing) => {
                    if let Err(err) = set_path(&mut resolved, path, existing.clone()) {
                        tracing::warn!(path = %path, error = %err, "could not restore preset value");
                    }
                    ParameterResolution {
                        path: path.clone(),
                        source: ParameterSource::PresetValue,
                        value: existing.clone(),
                        was_agent_authorized: true,
                        ai_value_was_available: false,
                    }
                }
                None => {
                    tracing::debug!(path = %path, "authorized path has neither AI nor preset value");
                    ParameterResolution {
                        path: path.clone(),
                        source: ParameterSource::Missing,
                        value: Value::Null,
                        was_agent_authorized: true,
                        ai_value_was_available: false,
                    }
                }
            };
            log.push(entry);
        }

        let mut ignored = Vec::new();
        for (key, value) in ai_arguments {
            if covered_paths.contains(key.as_str()) {
                continue;
            }
            if covered_roots.contains(key) {
                collect_unreached(key.clone(), value, &covered_paths, &mut ignored);
            } else {
                ignored.push((key.clone(), value.clone()));
            }
        }
        for (path, value) in ignored {
            tracing::debug!(path = %path, "ignoring AI-provided value for unauthorized field");
            log.push(ParameterResolution {
                path,
                source: ParameterSource::AiProvided,
                value,
                was_agent_authorized: false,
                ai_value_was_available: true,
            });
        }

        ParameterResolutionResult {
            resolved_settings: resolved,
            resolution_log: log,
        }
    }
}

/// Walk an AI value under an authorized root and collect the leaves that no
/// authorized path reaches.
fn collect_unreached(
    path: String,
    value: &Value,
    authorized: &HashSet<&str>,
    out: &mut Vec<(String, Value)>,
) {
    if is_reached(&path, authorized) {
        return;
    }
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                collect_unreached(format!("{}.{}", path, key), child, authorized, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                collect_unreached(format!("{}[{}]", path, index), child, authorized, out);
            }
        }
        _ => out.push((path, value.clone())),
    }
}

// A path is reached when an authorized path equals it or is one of its ancestors.
fn is_reached(path: &str, authorized: &HashSet<&str>) -> bool {
    authorized.iter().any(|candidate| {
        path.strip_prefix(candidate)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.') || rest.starts_with('['))
    })
}
