#[path = "../support/mod.rs"]
mod support;

use chrono::Utc;
use conduit::core::config::MemoryConfig;
use conduit::core::events::{ChannelEventPublisher, ExecutionEvent, NodeEventEmitter};
use conduit::core::memory::{format_context, MemoryManager, NoopMemoryManager, StoreMemoryManager};
use conduit::types::{AgentConversation, ConversationMetadata, ConversationStatus};
use std::sync::Arc;
use std::time::Duration;
use support::RecordingStore;
use tokio::sync::mpsc::UnboundedReceiver;

fn conversation(id: &str, prompt: &str, response: &str) -> AgentConversation {
    AgentConversation {
        conversation_id: id.to_string(),
        session_id: "whatever".to_string(),
        workspace_id: "ws-1".to_string(),
        messages: Vec::new(),
        user_prompt: prompt.to_string(),
        final_response: response.to_string(),
        tools_used: vec!["http_get".to_string()],
        status: ConversationStatus::Completed,
        metadata: ConversationMetadata {
            rounds: 2,
            tool_failures: 0,
            tool_executions: 1,
            execution_time_ms: 1200,
        },
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn emitter() -> (NodeEventEmitter, UnboundedReceiver<ExecutionEvent>) {
    let (publisher, rx) = ChannelEventPublisher::new();
    (NodeEventEmitter::new(Arc::new(publisher)), rx)
}

fn drain(rx: &mut UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_context_summarizes_previous_conversations() {
    let store = Arc::new(RecordingStore::with_conversations(vec![
        conversation("c-2", "What is the weather?", "Sunny and warm."),
        conversation("c-1", "List my buckets", "You have 3 buckets."),
    ]));
    let manager = StoreMemoryManager::new(store.clone(), "memory-node", "session-9");
    let (emitter, mut rx) = emitter();

    let context = manager.retrieve_context("ws-1", &emitter).await;

    assert!(context.starts_with("1. User asked: What is the weather?"));
    assert!(context.contains("Response: Sunny and warm."));
    assert!(context.contains("2. User asked: List my buckets"));
    assert!(context.contains("Tools used: http_get"));
    assert!(context.contains("Execution time: 1200ms"));

    let filters = store.filters.lock().unwrap().clone();
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].session_id, "session-9");
    assert_eq!(filters[0].workspace_id, "ws-1");
    assert_eq!(filters[0].limit, 5);

    let events = drain(&mut rx);
    let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["started", "executed"]);
    assert!(events.iter().all(|e| e.node_id() == "memory-node"));
}

#[tokio::test]
async fn test_enhance_appends_memory_section() {
    let store = Arc::new(RecordingStore::with_conversations(vec![conversation(
        "c-1",
        "List my buckets",
        "You have 3 buckets.",
    )]));
    let manager = StoreMemoryManager::new(store, "memory-node", "session-9");
    let (emitter, _rx) = emitter();

    let prompt = manager
        .enhance_system_prompt("You are helpful.\n", "ws-1", &emitter)
        .await;

    assert!(prompt.starts_with("You are helpful.\n\n## Previous conversations"));
    assert!(prompt.contains("1. User asked: List my buckets"));
}

#[tokio::test]
async fn test_empty_memory_leaves_prompt_unchanged() {
    let manager = StoreMemoryManager::new(Arc::new(RecordingStore::default()), "memory-node", "s");
    let (emitter, _rx) = emitter();

    let prompt = manager.enhance_system_prompt("Base prompt", "ws-1", &emitter).await;
    assert_eq!(prompt, "Base prompt");
}

#[tokio::test]
async fn test_store_failures_are_swallowed() {
    let manager = StoreMemoryManager::new(Arc::new(RecordingStore::failing()), "memory-node", "s");
    let (emitter, mut rx) = emitter();

    let prompt = manager.enhance_system_prompt("Base prompt", "ws-1", &emitter).await;
    assert_eq!(prompt, "Base prompt");

    manager
        .store_complete(&conversation("c-1", "hi", "hello"), &emitter)
        .await;

    let events = drain(&mut rx);
    let failures = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::NodeFailed { .. }))
        .count();
    assert_eq!(failures, 2);
}

#[tokio::test]
async fn test_store_uses_session_partition_and_ttl() {
    let store = Arc::new(RecordingStore::default());
    let config = MemoryConfig {
        ttl: "2h".to_string(),
        ..MemoryConfig::default()
    };
    let manager =
        StoreMemoryManager::new(store.clone(), "memory-node", "session-9").with_config(config);
    let (emitter, _rx) = emitter();

    manager
        .store_start(&conversation("c-1", "hi", ""), &emitter)
        .await;
    manager
        .store_complete(&conversation("c-1", "hi", "hello"), &emitter)
        .await;

    let stored = store.stored.lock().unwrap().clone();
    assert_eq!(stored.len(), 2);
    for (record, partition, ttl) in &stored {
        assert_eq!(record.session_id, "session-9");
        assert_eq!(partition, "ws-1:session-9");
        assert_eq!(*ttl, Duration::from_secs(7200));
    }
    assert_eq!(stored[1].0.final_response, "hello");
}

#[tokio::test]
async fn test_noop_memory_manager_is_inert() {
    let (emitter, mut rx) = emitter();
    let manager = NoopMemoryManager;

    assert_eq!(manager.retrieve_context("ws-1", &emitter).await, "");
    assert_eq!(
        manager.enhance_system_prompt("Base", "ws-1", &emitter).await,
        "Base"
    );
    manager
        .store_start(&conversation("c-1", "hi", ""), &emitter)
        .await;
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_format_context_respects_budget_and_limit() {
    let conversations: Vec<_> = (0..8)
        .map(|i| {
            conversation(
                &format!("c-{}", i),
                &format!("Question number {}?", i),
                "A fairly long answer. It has several sentences. Each one adds text.",
            )
        })
        .collect();

    let context = format_context(&conversations, 3, 300, 10_000);
    assert!(context.contains("3. User asked"));
    assert!(!context.contains("4. User asked"));

    let truncated = format_context(&conversations, 8, 300, 400);
    assert!(truncated.ends_with("[memory truncated]"));
    assert!(truncated.chars().count() <= 400 + "...\n[memory truncated]".len());
}

#[test]
fn test_format_context_flags_failures() {
    let mut failed = conversation("c-1", "Deploy", "");
    failed.status = ConversationStatus::Failed;
    failed.metadata.tool_failures = 3;

    let context = format_context(&[failed], 5, 300, 4000);
    assert!(context.contains("Tool failures: 3"));
    assert!(context.contains("Status: failed"));
    assert!(!context.contains("Response:"));
}

#[test]
fn test_long_responses_are_previewed() {
    let long = "x".repeat(500);
    let context = format_context(&[conversation("c-1", "q", &long)], 5, 50, 4000);
    assert!(context.contains(&format!("Response: {}...", "x".repeat(50))));
}
