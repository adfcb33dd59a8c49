//! Typed values-schema tree
//!
//! Both `values.schema.json` files and CustomResourceDefinition OpenAPI
//! schemas are converted into the same [`SchemaField`] tree, so callers can
//! present and default chart and CRD parameters identically.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};
use crate::values::Values;

/// Field type as declared by the schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    #[default]
    Object,
    /// No type or a type this tree doesn't model
    Any,
}

impl FieldType {
    fn parse(schema: &JsonValue) -> Self {
        let declared = match schema.get("type") {
            Some(JsonValue::String(s)) => Some(s.as_str()),
            // ["string", "null"] style unions: first non-null wins
            Some(JsonValue::Array(types)) => types
                .iter()
                .filter_map(JsonValue::as_str)
                .find(|t| *t != "null"),
            _ => None,
        };

        match declared {
            Some("string") => Self::String,
            Some("integer") => Self::Integer,
            Some("number") => Self::Number,
            Some("boolean") => Self::Boolean,
            Some("array") => Self::Array,
            Some("object") => Self::Object,
            Some(_) => Self::Any,
            None if schema.get("properties").is_some() => Self::Object,
            None => Self::Any,
        }
    }
}

/// One node of the schema tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<JsonValue>,

    /// Object children, sorted by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SchemaField>,

    /// Array element schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaField>>,
}

/// Root of a parsed schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldTree {
    pub fields: Vec<SchemaField>,
}

impl FieldTree {
    /// Parse raw `values.schema.json` bytes
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let schema: JsonValue =
            serde_json::from_slice(bytes).map_err(|e| CoreError::InvalidSchema {
                message: format!("values.schema.json is not valid JSON: {}", e),
            })?;
        Self::from_json_schema(&schema)
    }

    /// Build a tree from a JSON/OpenAPI schema object
    pub fn from_json_schema(schema: &JsonValue) -> Result<Self> {
        if !schema.is_object() {
            return Err(CoreError::InvalidSchema {
                message: "schema root must be an object".to_string(),
            });
        }
        Ok(Self {
            fields: parse_children(schema),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Find a field by dotted path
    pub fn find(&self, path: &str) -> Option<&SchemaField> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.fields.iter().find(|f| f.name == first)?;
        for part in parts {
            current = current.children.iter().find(|f| f.name == part)?;
        }
        Some(current)
    }

    /// Default values declared anywhere in the tree
    pub fn defaults(&self) -> Values {
        let mut map = serde_json::Map::new();
        for field in &self.fields {
            if let Some(v) = field_default(field) {
                map.insert(field.name.clone(), v);
            }
        }
        Values(JsonValue::Object(map))
    }
}

fn parse_children(schema: &JsonValue) -> Vec<SchemaField> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(JsonValue::as_array)
        .map(|arr| arr.iter().filter_map(JsonValue::as_str).collect())
        .unwrap_or_default();

    let mut fields: Vec<SchemaField> = schema
        .get("properties")
        .and_then(JsonValue::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| parse_field(name, prop, required.contains(&name.as_str())))
                .collect()
        })
        .unwrap_or_default();

    fields.sort_by(|a, b| a.name.cmp(&b.name));
    fields
}

fn parse_field(name: &str, prop: &JsonValue, required: bool) -> SchemaField {
    SchemaField {
        name: name.to_string(),
        field_type: FieldType::parse(prop),
        description: prop
            .get("description")
            .and_then(JsonValue::as_str)
            .map(String::from),
        default: prop.get("default").cloned(),
        required,
        enum_values: prop
            .get("enum")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default(),
        children: parse_children(prop),
        items: prop
            .get("items")
            .filter(|i| i.is_object())
            .map(|i| Box::new(parse_field("items", i, false))),
    }
}

fn field_default(field: &SchemaField) -> Option<JsonValue> {
    if let Some(default) = &field.default {
        return Some(default.clone());
    }
    if field.field_type != FieldType::Object {
        return None;
    }

    let nested: serde_json::Map<String, JsonValue> = field
        .children
        .iter()
        .filter_map(|child| field_default(child).map(|v| (child.name.clone(), v)))
        .collect();

    (!nested.is_empty()).then_some(JsonValue::Object(nested))
}

/// A single schema violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON pointer to the offending value, `(root)` for the document itself
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Compiled JSON Schema validator for chart values
pub struct ValuesValidator {
    compiled: jsonschema::Validator,
}

impl ValuesValidator {
    /// Compile raw schema bytes
    pub fn new(raw_schema: &[u8]) -> Result<Self> {
        let schema: JsonValue =
            serde_json::from_slice(raw_schema).map_err(|e| CoreError::InvalidSchema {
                message: format!("values.schema.json is not valid JSON: {}", e),
            })?;

        let compiled = jsonschema::validator_for(&schema).map_err(|e| CoreError::InvalidSchema {
            message: format!("Invalid schema: {}", e),
        })?;

        Ok(Self { compiled })
    }

    /// Validate values, returning every violation found
    pub fn validate(&self, values: &Values) -> Vec<SchemaViolation> {
        self.compiled
            .iter_errors(values.inner())
            .map(|e| {
                let path = e.instance_path.to_string();
                SchemaViolation {
                    path: if path.is_empty() {
                        "(root)".to_string()
                    } else {
                        path
                    },
                    message: e.to_string().replace('"', "'"),
                }
            })
            .collect()
    }
}
