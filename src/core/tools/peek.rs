use crate::core::integration::PeekItem;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound of options listed per field in the system prompt.
pub const MAX_PEEK_OPTIONS: usize = 50;

/// Label/identifier pair surfaced to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeekOption {
    pub label: String,
    pub value: String,
}

/// Available options for one agent-authorized peekable field of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeekableFieldOptions {
    pub tool_name: String,
    pub field: String,
    pub peekable_type: String,
    pub options: Vec<PeekOption>,
}

impl From<&PeekItem> for PeekOption {
    fn from(item: &PeekItem) -> Self {
        let label = if item.content.is_empty() {
            item.key.clone()
        } else {
            item.content.clone()
        };
        PeekOption {
            label,
            value: item.value.clone(),
        }
    }
}

/// Find the item a label refers to. Priority: exact content, exact value,
/// exact key, then case-insensitive substring of the content.
///
/// The substring fallback can pick the wrong item when labels are prefixes of
/// one another; the first item in lookup order wins.
pub fn match_peek_item<'a>(label: &str, items: &'a [PeekItem]) -> Option<&'a PeekItem> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    items
        .iter()
        .find(|item| item.content == label)
        .or_else(|| items.iter().find(|item| item.value == label))
        .or_else(|| items.iter().find(|item| item.key == label))
        .or_else(|| {
            let needle = label.to_lowercase();
            items
                .iter()
                .find(|item| item.content.to_lowercase().contains(&needle))
        })
}

/// Translate a label (or a list of labels) into identifiers. Values without a
/// match are kept, since they may already be identifiers.
pub fn resolve_peek_value(value: &Value, items: &[PeekItem]) -> Value {
    match value {
        Value::String(label) => match match_peek_item(label, items) {
            Some(item) => Value::String(item.value.clone()),
            None => value.clone(),
        },
        Value::Array(values) => Value::Array(
            values
                .iter()
                .map(|entry| resolve_peek_value(entry, items))
                .collect(),
        ),
        _ => value.clone(),
    }
}
