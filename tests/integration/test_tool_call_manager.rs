#[path = "../support/mod.rs"]
mod support;

use conduit::core::events::{ChannelEventPublisher, ExecutionEvent, NodeEventEmitter};
use conduit::core::integration::{ToolExecutor, WorkflowNode, AGENT_INPUT_ID};
use conduit::core::settings::{ArrayMergeStrategy, ParameterResolver};
use conduit::core::tools::ToolCallManager;
use conduit::types::ParameterSource;
use serde_json::json;
use std::sync::Arc;
use support::{catalog, http_executor, object, peek_item, tool_call, FakeIntegration};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

fn emitter() -> (NodeEventEmitter, UnboundedReceiver<ExecutionEvent>) {
    let (publisher, rx) = ChannelEventPublisher::new();
    (NodeEventEmitter::new(Arc::new(publisher)), rx)
}

fn kinds(rx: &mut UnboundedReceiver<ExecutionEvent>) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind());
    }
    kinds
}

fn s3_executor(integration: Arc<FakeIntegration>) -> ToolExecutor {
    let node = WorkflowNode::new("node-s3", "s3")
        .with_settings(object(json!({"bucket": "default-bucket", "prefix": "logs/"})))
        .with_authorized_paths(["bucket"]);
    ToolExecutor::new(node, "ws-1", integration).with_credential("cred-s3")
}

#[tokio::test]
async fn test_discovers_one_tool_per_action() {
    let manager = ToolCallManager::new(catalog());
    let executors = vec![
        http_executor(json!({"url": "https://old"}), &["url"], Arc::new(FakeIntegration::ok(json!({})))),
        s3_executor(Arc::new(FakeIntegration::ok(json!([])))),
    ];

    let tools = manager.discover_tools(&executors).await.unwrap();
    let names: Vec<_> = tools.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(names, vec!["http_get", "s3_list_objects"]);

    let http = &tools[0];
    assert_eq!(http.identity().node_id, "node-http");
    assert_eq!(http.identity().action_type, "get");
    assert_eq!(http.spec().name, "http_get");
    // only the authorized url property is exposed, and it is already preset
    let properties = http.parameters["properties"].as_object().unwrap();
    assert_eq!(properties.len(), 1);
    assert!(http.parameters.get("required").is_none());
}

#[tokio::test]
async fn test_last_executor_wins_on_name_collision() {
    let manager = ToolCallManager::new(catalog());
    let first = http_executor(json!({}), &[], Arc::new(FakeIntegration::ok(json!(1))));
    let mut second_node = WorkflowNode::new("node-http-2", "http");
    second_node.name = "Backup fetch".to_string();
    let second = ToolExecutor::new(second_node, "ws-1", Arc::new(FakeIntegration::ok(json!(2))));

    let tools = manager.discover_tools(&[first, second]).await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].executor.node_id, "node-http-2");
    assert!(tools[0].description.contains("(workflow node 'Backup fetch')"));
}

#[tokio::test]
async fn test_allow_list_filters_actions() {
    let manager = ToolCallManager::new(catalog());
    let executor = s3_executor(Arc::new(FakeIntegration::ok(json!([]))))
        .with_allowed_actions(["delete_bucket"]);
    let http = http_executor(json!({}), &[], Arc::new(FakeIntegration::ok(json!({}))));

    let tools = manager.discover_tools(&[executor, http]).await.unwrap();
    let names: Vec<_> = tools.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(names, vec!["http_get"]);
}

#[tokio::test]
async fn test_discovery_fails_when_nothing_is_callable() {
    let manager = ToolCallManager::new(catalog());
    let node = WorkflowNode::new("node-x", "unknown_integration");
    let executor = ToolExecutor::new(node, "ws-1", Arc::new(FakeIntegration::ok(json!({}))));

    let err = manager.discover_tools(&[executor]).await.unwrap_err();
    assert_eq!(err.code, "AGT-DISC-002");
    assert!(err.context.get("cause").unwrap().contains("AGT-DISC-001"));

    assert!(manager.discover_tools(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_find_tool_tolerates_namespacing() {
    let manager = ToolCallManager::new(catalog());
    let executors = vec![http_executor(json!({}), &[], Arc::new(FakeIntegration::ok(json!({}))))];
    let tools = manager.discover_tools(&executors).await.unwrap();

    assert!(manager.find_tool("http_get", &tools).is_some());
    assert!(manager.find_tool("functions.http_get", &tools).is_some());
    assert!(manager.find_tool("default_api:HTTP_GET", &tools).is_some());
    assert!(manager.find_tool("http_post", &tools).is_none());
}

#[tokio::test]
async fn test_executes_with_resolved_settings() {
    let integration = Arc::new(FakeIntegration::ok(json!({"status": 200, "body": "ok"})));
    let manager = ToolCallManager::new(catalog());
    let executors = vec![http_executor(
        json!({"url": "https://old", "method": "GET", "credential_id": "cred-1"}),
        &["url"],
        integration.clone(),
    )];
    let tools = manager.discover_tools(&executors).await.unwrap();
    let (emitter, mut rx) = emitter();

    let call = tool_call("call-1", "http_get", json!({"url": "https://new", "method": "DELETE"}));
    let result = manager
        .execute_tool_call(&call, &tools, &emitter, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.content, r#"{"body":"ok","status":200}"#);
    assert_eq!(result.resolved_settings["url"], json!("https://new"));
    assert_eq!(result.resolved_settings["method"], json!("GET"));
    assert!(!result.resolved_settings.contains_key("credential_id"));
    assert_eq!(result.tool_identity.as_ref().unwrap().node_id, "node-http");

    let url_entry = result.resolution_log.iter().find(|e| e.path == "url").unwrap();
    assert_eq!(url_entry.source, ParameterSource::AiProvided);
    assert!(result
        .resolution_log
        .iter()
        .any(|e| e.path == "method" && !e.was_agent_authorized));

    let inputs = integration.inputs();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].action_type, "get");
    assert_eq!(inputs[0].node_id, "node-http");
    assert_eq!(inputs[0].workspace_id, "ws-1");
    assert_eq!(inputs[0].settings["url"], json!("https://new"));
    assert_eq!(
        inputs[0].payload_by_input_id[AGENT_INPUT_ID][0]["url"],
        json!("https://new")
    );

    assert_eq!(kinds(&mut rx), vec!["started", "executed"]);
}

#[tokio::test]
async fn test_append_strategy_applies_to_tool_calls() {
    let integration = Arc::new(FakeIntegration::ok(json!("done")));
    let manager = ToolCallManager::new(catalog())
        .with_resolver(ParameterResolver::new(ArrayMergeStrategy::Append));
    let executors = vec![http_executor(json!({"tags": ["a", "b"]}), &["tags"], integration.clone())];
    let tools = manager.discover_tools(&executors).await.unwrap();
    let (emitter, _rx) = emitter();

    let call = tool_call("call-1", "http_get", json!({"tags": ["c"]}));
    let result = manager
        .execute_tool_call(&call, &tools, &emitter, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.content, "done");
    assert_eq!(integration.inputs()[0].settings["tags"], json!(["c", "a", "b"]));
}

#[tokio::test]
async fn test_tool_failure_is_a_result_not_an_error() {
    let integration = Arc::new(FakeIntegration::failing("connection reset by peer"));
    let manager = ToolCallManager::new(catalog());
    let executors = vec![http_executor(json!({"url": "https://old"}), &["url"], integration)];
    let tools = manager.discover_tools(&executors).await.unwrap();
    let (emitter, mut rx) = emitter();

    let call = tool_call("call-1", "http_get", json!({}));
    let result = manager
        .execute_tool_call(&call, &tools, &emitter, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("connection reset by peer"));
    assert_eq!(result.message_content(), "Error: connection reset by peer");
    let record = result.to_record(2);
    assert_eq!(record.round, 2);
    assert!(record.result.is_none());
    assert_eq!(kinds(&mut rx), vec!["started", "failed"]);
}

#[tokio::test]
async fn test_unknown_tool_fails_without_events() {
    let manager = ToolCallManager::new(catalog());
    let executors = vec![http_executor(json!({}), &[], Arc::new(FakeIntegration::ok(json!({}))))];
    let tools = manager.discover_tools(&executors).await.unwrap();
    let (emitter, mut rx) = emitter();

    let call = tool_call("call-9", "slack_post", json!({"text": "hi"}));
    let result = manager
        .execute_tool_call(&call, &tools, &emitter, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.unwrap().contains("not found"));
    assert!(kinds(&mut rx).is_empty());
}

#[tokio::test]
async fn test_peekable_labels_resolve_to_identifiers() {
    let integration = Arc::new(FakeIntegration::ok(json!([])).with_peek_items(vec![
        peek_item("reports", "bkt-123", "Reports archive"),
        peek_item("media", "bkt-456", "Media uploads"),
    ]));
    let manager = ToolCallManager::new(catalog());
    let tools = manager
        .discover_tools(&[s3_executor(integration.clone())])
        .await
        .unwrap();
    let (emitter, _rx) = emitter();

    let call = tool_call("call-1", "s3_list_objects", json!({"bucket": "Media uploads"}));
    let result = manager
        .execute_tool_call(&call, &tools, &emitter, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(integration.inputs()[0].settings["bucket"], json!("bkt-456"));
    assert_eq!(integration.inputs()[0].credential_id.as_deref(), Some("cred-s3"));
    assert_eq!(integration.peek_count(), 1);
}

#[tokio::test]
async fn test_peekable_data_lists_authorized_fields() {
    let integration = Arc::new(FakeIntegration::ok(json!([])).with_peek_items(vec![
        peek_item("reports", "bkt-123", "Reports archive"),
        peek_item("raw", "bkt-789", ""),
    ]));
    let manager = ToolCallManager::new(catalog());
    let tools = manager
        .discover_tools(&[s3_executor(integration)])
        .await
        .unwrap();

    let fields = manager.get_peekable_data(&tools).await;
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].tool_name, "s3_list_objects");
    assert_eq!(fields[0].field, "bucket");
    assert_eq!(fields[0].peekable_type, "buckets");
    assert_eq!(fields[0].options[0].label, "Reports archive");
    assert_eq!(fields[0].options[1].label, "raw");
    assert_eq!(fields[0].options[1].value, "bkt-789");
}

#[tokio::test]
async fn test_cancellation_is_an_error() {
    let integration = Arc::new(FakeIntegration::ok(json!({})));
    let manager = ToolCallManager::new(catalog());
    let executors = vec![http_executor(json!({}), &[], integration.clone())];
    let tools = manager.discover_tools(&executors).await.unwrap();
    let (emitter, mut rx) = emitter();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let call = tool_call("call-1", "http_get", json!({}));
    let err = manager
        .execute_tool_call(&call, &tools, &emitter, &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancellation());
    assert_eq!(err.code, "AGT-CANCEL-001");
    assert!(integration.inputs().is_empty());
    assert_eq!(kinds(&mut rx), vec!["started", "failed"]);
}
