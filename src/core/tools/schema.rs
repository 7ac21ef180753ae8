use crate::core::integration::{ActionDefinition, PropertyDefinition, PropertyType, WorkflowNode};
use crate::core::settings::resolver::is_reserved_key;
use serde_json::{json, Map, Value};

/// Tool name exposed to the model: `{integration_type}_{action_type}`, lower-cased.
pub fn tool_name(integration_type: &str, action_type: &str) -> String {
    format!("{}_{}", integration_type, action_type)
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// JSON-Schema object describing the arguments the model may pass for an action.
///
/// When the owning node authorizes specific paths, only the top-level
/// properties those paths reach are exposed. Properties already preset on the
/// node are never marked required.
pub fn action_parameters_schema(action: &ActionDefinition, node: Option<&WorkflowNode>) -> Value {
    let restrict = node.is_some_and(|node| !node.agent_authorized_paths.is_empty());
    let mut properties = Map::new();
    let mut required = Vec::new();

    for property in &action.properties {
        if is_reserved_key(&property.key) {
            continue;
        }
        if restrict && !node.is_some_and(|node| node.authorizes_root(&property.key)) {
            continue;
        }
        properties.insert(property.key.clone(), property_schema(property));
        let preset = node.is_some_and(|node| node.settings.contains_key(&property.key));
        if property.required && !preset {
            required.push(Value::String(property.key.clone()));
        }
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }
    Value::Object(schema)
}

pub fn property_schema(property: &PropertyDefinition) -> Value {
    let mut schema = Map::new();
    match property.property_type {
        PropertyType::String | PropertyType::Text | PropertyType::Url => {
            schema.insert("type".to_string(), json!("string"));
        }
        PropertyType::Integer => {
            schema.insert("type".to_string(), json!("integer"));
        }
        PropertyType::Number => {
            schema.insert("type".to_string(), json!("number"));
        }
        PropertyType::Boolean => {
            schema.insert("type".to_string(), json!("boolean"));
        }
        PropertyType::Select => {
            schema.insert("type".to_string(), json!(option_type(property)));
            if !property.options.is_empty() {
                schema.insert("enum".to_string(), option_values(property));
            }
        }
        PropertyType::MultiSelect => {
            schema.insert("type".to_string(), json!("array"));
            let mut items = Map::new();
            items.insert("type".to_string(), json!(option_type(property)));
            if !property.options.is_empty() {
                items.insert("enum".to_string(), option_values(property));
            }
            schema.insert("items".to_string(), Value::Object(items));
        }
        PropertyType::Array => {
            schema.insert("type".to_string(), json!("array"));
            let items = if property.item_properties.is_empty() {
                json!({"type": "string"})
            } else {
                object_schema(&property.item_properties)
            };
            schema.insert("items".to_string(), items);
        }
        PropertyType::Object => {
            if property.item_properties.is_empty() {
                schema.insert("type".to_string(), json!("object"));
            } else if let Value::Object(object) = object_schema(&property.item_properties) {
                schema.extend(object);
            }
        }
        // Free-form JSON: no type constraint.
        PropertyType::Json => {}
    }

    let description = describe(property);
    if !description.is_empty() {
        schema.insert("description".to_string(), Value::String(description));
    }
    if let Some(min) = property.min_length {
        schema.insert("minLength".to_string(), json!(min));
    }
    if let Some(max) = property.max_length {
        schema.insert("maxLength".to_string(), json!(max));
    }
    if let Some(min) = property.min_items {
        schema.insert("minItems".to_string(), json!(min));
    }
    if let Some(max) = property.max_items {
        schema.insert("maxItems".to_string(), json!(max));
    }
    if let Some(default) = &property.default {
        schema.insert("default".to_string(), default.clone());
    }
    Value::Object(schema)
}

fn object_schema(properties: &[PropertyDefinition]) -> Value {
    let mut nested = Map::new();
    let mut required = Vec::new();
    for property in properties {
        nested.insert(property.key.clone(), property_schema(property));
        if property.required {
            required.push(Value::String(property.key.clone()));
        }
    }
    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(nested));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }
    Value::Object(schema)
}

fn option_type(property: &PropertyDefinition) -> &'static str {
    if !property.options.is_empty() && property.options.iter().all(|option| option.value.is_number()) {
        "number"
    } else {
        "string"
    }
}

fn option_values(property: &PropertyDefinition) -> Value {
    Value::Array(
        property
            .options
            .iter()
            .map(|option| option.value.clone())
            .collect(),
    )
}

fn describe(property: &PropertyDefinition) -> String {
    let mut description = if property.description.is_empty() {
        property.name.clone()
    } else {
        property.description.clone()
    };
    if property.peekable.is_some() {
        if !description.is_empty() {
            description.push(' ');
        }
        description.push_str("Accepts a display name or an identifier; names are resolved to identifiers.");
    }
    description
}
