use conduit::core::integration::WorkflowNode;
use conduit::core::settings::{ArrayMergeStrategy, ParameterResolver};
use conduit::core::types::ErrorCategory;
use conduit::types::ParameterSource;
use serde_json::{json, Map, Value};

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("object")
}

fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

#[test]
fn agent_value_overrides_authorized_preset() {
    let preset = object(json!({"url": "https://old", "method": "GET"}));
    let ai = object(json!({"url": "https://new"}));

    let result = ParameterResolver::default().resolve(&preset, &paths(&["url"]), &ai);

    assert_eq!(
        Value::Object(result.resolved_settings.clone()),
        json!({"url": "https://new", "method": "GET"})
    );
    let entry = result.entry("url").expect("url entry");
    assert_eq!(entry.source, ParameterSource::AiProvided);
    assert!(entry.was_agent_authorized);
    assert!(entry.ai_value_was_available);
    assert_eq!(entry.value, json!("https://new"));
}

#[test]
fn append_strategy_merges_arrays_agent_first() {
    let preset = object(json!({"tags": ["a", "b"]}));
    let ai = object(json!({"tags": ["c"]}));

    let result = ParameterResolver::new(ArrayMergeStrategy::Append).resolve(&preset, &paths(&["tags"]), &ai);

    assert_eq!(result.resolved_settings["tags"], json!(["c", "a", "b"]));
    assert_eq!(result.entry("tags").map(|e| e.source), Some(ParameterSource::AiProvided));
}

#[test]
fn every_authorized_path_gets_one_audit_entry() {
    let preset = object(json!({"url": "https://old", "method": "GET"}));
    let ai = object(json!({"url": "https://new"}));
    let authorized = paths(&["url", "method", "timeout"]);

    let result = ParameterResolver::default().resolve(&preset, &authorized, &ai);

    for path in &authorized {
        let count = result
            .resolution_log
            .iter()
            .filter(|entry| entry.was_agent_authorized && &entry.path == path)
            .count();
        assert_eq!(count, 1, "path {}", path);
    }
    assert_eq!(result.entry("url").map(|e| e.source), Some(ParameterSource::AiProvided));
    assert_eq!(result.entry("method").map(|e| e.source), Some(ParameterSource::PresetValue));

    let missing = result.entry("timeout").expect("timeout entry");
    assert_eq!(missing.source, ParameterSource::Missing);
    assert_eq!(missing.value, Value::Null);
    assert!(!result.resolved_settings.contains_key("timeout"));

    assert_eq!(result.count_by_source(ParameterSource::AiProvided), 1);
    assert_eq!(result.count_by_source(ParameterSource::PresetValue), 1);
    assert_eq!(result.count_by_source(ParameterSource::Missing), 1);
}

#[test]
fn inputs_are_never_mutated() {
    let preset = object(json!({"body": {"items": [1, 2]}}));
    let ai = object(json!({"body": {"items": [3]}}));
    let preset_before = preset.clone();
    let ai_before = ai.clone();

    let mut result = ParameterResolver::default().resolve(&preset, &paths(&["body.items"]), &ai);
    result
        .resolved_settings
        .insert("body".to_string(), json!("changed"));

    assert_eq!(preset, preset_before);
    assert_eq!(ai, ai_before);
}

#[test]
fn reserved_keys_never_reach_resolved_settings() {
    let preset = object(json!({
        "url": "https://old",
        "credential_id": "cred-1",
        "nodeId": "node-1"
    }));
    let ai = object(json!({"credential_id": "cred-evil", "url": "https://new"}));

    let result = ParameterResolver::default().resolve(&preset, &paths(&["url", "credential_id"]), &ai);

    assert!(!result.resolved_settings.contains_key("credential_id"));
    assert!(!result.resolved_settings.contains_key("nodeId"));
    assert_eq!(result.resolved_settings["url"], json!("https://new"));
}

#[test]
fn unauthorized_agent_values_are_logged_not_applied() {
    let preset = object(json!({"url": "https://old", "method": "GET"}));
    let ai = object(json!({"method": "DELETE", "invented": 42}));

    let result = ParameterResolver::default().resolve(&preset, &paths(&["url"]), &ai);

    assert_eq!(result.resolved_settings["method"], json!("GET"));
    assert!(!result.resolved_settings.contains_key("invented"));

    let ignored: Vec<_> = result.ignored_ai_values().map(|e| e.path.as_str()).collect();
    assert_eq!(ignored.len(), 2);
    assert!(ignored.contains(&"method"));
    assert!(ignored.contains(&"invented"));
    for entry in result.ignored_ai_values() {
        assert_eq!(entry.source, ParameterSource::AiProvided);
        assert!(entry.ai_value_was_available);
    }
}

#[test]
fn nested_authorized_path_covers_its_root_key() {
    let preset = object(json!({"body": {"title": "old", "draft": true}}));
    let ai = object(json!({"body": {"title": "new"}}));

    let result = ParameterResolver::default().resolve(&preset, &paths(&["body.title"]), &ai);

    assert_eq!(result.resolved_settings["body"], json!({"title": "new", "draft": true}));
    assert_eq!(result.ignored_ai_values().count(), 0);
}

#[test]
fn unauthorized_sub_keys_of_a_covered_root_are_audited() {
    let preset = object(json!({"body": {"title": "old", "draft": true}}));
    let ai = object(json!({"body": {"title": "new", "admin": {"role": "owner"}}}));

    let result = ParameterResolver::default().resolve(&preset, &paths(&["body.title"]), &ai);

    assert_eq!(result.resolved_settings["body"], json!({"title": "new", "draft": true}));
    let ignored: Vec<_> = result.ignored_ai_values().collect();
    assert_eq!(ignored.len(), 1);
    assert_eq!(ignored[0].path, "body.admin.role");
    assert_eq!(ignored[0].value, json!("owner"));
    assert_eq!(ignored[0].source, ParameterSource::AiProvided);
}

#[test]
fn malformed_authorized_paths_are_skipped() {
    let preset = object(json!({"url": "https://old"}));
    let ai = object(json!({"url": "https://new"}));

    let result = ParameterResolver::default().resolve(&preset, &paths(&["url[", "url"]), &ai);

    assert_eq!(result.resolved_settings["url"], json!("https://new"));
    assert!(result.entry("url[").is_none());
}

#[test]
fn resolve_for_node_uses_node_presets() {
    let node = WorkflowNode::new("node-1", "http")
        .with_settings(object(json!({"url": "https://old", "method": "GET"})))
        .with_authorized_paths(["method"]);
    let ai = object(json!({"method": "HEAD"}));

    let result = ParameterResolver::default()
        .resolve_for_node(Some(&node), &ai)
        .expect("resolution succeeds");

    assert_eq!(result.resolved_settings["method"], json!("HEAD"));
    assert_eq!(result.resolved_settings["url"], json!("https://old"));
}

#[test]
fn resolve_for_node_requires_a_node() {
    let err = ParameterResolver::default()
        .resolve_for_node(None, &Map::new())
        .unwrap_err();
    assert_eq!(err.code, "AGT-PARAM-001");
    assert_eq!(err.category, ErrorCategory::ValidationError);
}
