#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Primitive kinds an integration property can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Text,
    Url,
    Number,
    Integer,
    Boolean,
    Select,
    MultiSelect,
    Array,
    Object,
    Json,
}

/// Discrete choice offered by select-like properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyOption {
    pub label: String,
    pub value: Value,
}

/// Marks a property whose valid values come from the integration's peek lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeekableSpec {
    pub peekable_type: String,
    /// Settings keys forwarded in the peek payload (e.g. a region for a bucket list).
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub property_type: PropertyType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<PropertyOption>,
    #[serde(default)]
    pub peekable: Option<PeekableSpec>,
    /// Item schema for arrays of objects.
    #[serde(default)]
    pub item_properties: Vec<PropertyDefinition>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub min_length: Option<u64>,
    #[serde(default)]
    pub max_length: Option<u64>,
    #[serde(default)]
    pub min_items: Option<u64>,
    #[serde(default)]
    pub max_items: Option<u64>,
}

impl PropertyDefinition {
    pub fn new(key: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            key: key.into(),
            name: String::new(),
            description: String::new(),
            property_type,
            required: false,
            options: Vec::new(),
            peekable: None,
            item_properties: Vec::new(),
            default: None,
            min_length: None,
            max_length: None,
            min_items: None,
            max_items: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_options(mut self, options: Vec<PropertyOption>) -> Self {
        self.options = options;
        self
    }

    pub fn with_items(mut self, item_properties: Vec<PropertyDefinition>) -> Self {
        self.item_properties = item_properties;
        self
    }

    pub fn peekable(mut self, peekable_type: impl Into<String>) -> Self {
        self.peekable = Some(PeekableSpec {
            peekable_type: peekable_type.into(),
            depends_on: Vec::new(),
        });
        self
    }
}

/// One action an integration can perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub action_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
}

impl ActionDefinition {
    pub fn property(&self, key: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|property| property.key == key)
    }
}

/// Source of integration action metadata.
#[async_trait]
pub trait IntegrationCatalog: Send + Sync {
    async fn actions(&self, integration_type: &str) -> Result<Vec<ActionDefinition>, AppError>;
}

/// In-memory catalog keyed by integration type.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    integrations: HashMap<String, Vec<ActionDefinition>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_integration(
        mut self,
        integration_type: impl Into<String>,
        actions: Vec<ActionDefinition>,
    ) -> Self {
        self.integrations.insert(integration_type.into(), actions);
        self
    }
}

#[async_trait]
impl IntegrationCatalog for StaticCatalog {
    async fn actions(&self, integration_type: &str) -> Result<Vec<ActionDefinition>, AppError> {
        self.integrations
            .get(integration_type)
            .cloned()
            .ok_or_else(|| {
                AppError::new(
                    ErrorCategory::ToolDiscoveryError,
                    format!("integration '{}' is not registered", integration_type),
                )
                .with_code("AGT-DISC-001")
            })
    }
}
