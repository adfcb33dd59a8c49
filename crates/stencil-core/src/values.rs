//! Values handling with deep merge support and checked accessors

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::error::{CoreError, Result, ValueLookupError};

/// Values container with deep merge capability
///
/// Wraps an arbitrary JSON document. Lookups go through dotted paths and
/// return either an `Option` or a [`ValueLookupError`], never a bare cast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse values from YAML string
    ///
    /// An empty or comment-only document yields empty values.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(match value {
            JsonValue::Null => Self::new(),
            other => Self(other),
        })
    }

    /// Parse values from raw YAML bytes
    pub fn from_yaml_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| CoreError::MalformedArtifact {
            message: format!("values file is not valid UTF-8: {}", e),
            hint: None,
        })?;
        Self::from_yaml(text)
    }

    /// Parse values from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self(value))
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Objects: recursive merge
    /// - Everything else (scalars, arrays, null): overlay replaces base
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Merge multiple values in order, later entries winning
    pub fn merge_all(values: impl IntoIterator<Item = Values>) -> Self {
        let mut result = Values::new();
        for v in values {
            result.merge(&v);
        }
        result
    }

    /// Set a value by dotted path (e.g., "image.tag")
    pub fn set(&mut self, path: &str, value: JsonValue) {
        let parts: Vec<&str> = path.split('.').collect();
        set_nested(&mut self.0, &parts, value);
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let parts: Vec<&str> = path.split('.').collect();
        get_nested(&self.0, &parts)
    }

    /// Get a value by dotted path, reporting the missing path on failure
    pub fn lookup(&self, path: &str) -> std::result::Result<&JsonValue, ValueLookupError> {
        self.get(path).ok_or_else(|| ValueLookupError::NotFound {
            path: path.to_string(),
        })
    }

    /// Get a boolean by dotted path
    ///
    /// No truthiness coercion: `"true"`, `1` or `{}` are type mismatches.
    pub fn get_bool(&self, path: &str) -> std::result::Result<bool, ValueLookupError> {
        let value = self.lookup(path)?;
        value.as_bool().ok_or_else(|| ValueLookupError::TypeMismatch {
            path: path.to_string(),
            expected: "a boolean",
            found: kind_of(value),
        })
    }

    /// Get a string by dotted path
    pub fn get_str(&self, path: &str) -> std::result::Result<&str, ValueLookupError> {
        let value = self.lookup(path)?;
        value.as_str().ok_or_else(|| ValueLookupError::TypeMismatch {
            path: path.to_string(),
            expected: "a string",
            found: kind_of(value),
        })
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Serialized size in bytes, used for cache accounting
    pub fn byte_size(&self) -> usize {
        serde_json::to_vec(&self.0).map(|v| v.len()).unwrap_or(0)
    }

    /// Layer the merged values for a chart
    ///
    /// Precedence, lowest first: schema defaults, chart defaults, user values.
    pub fn layered(schema_defaults: Values, chart_defaults: &Values, user: &Values) -> Self {
        let mut result = schema_defaults;
        result.merge(chart_defaults);
        result.merge(user);
        result
    }

    /// Scope values for a dependency chart
    ///
    /// The dependency sees the parent's `<name>.*` values as its root plus the
    /// parent's `global` block.
    pub fn scope_for_dependency(&self, name: &str) -> Values {
        let mut scoped = serde_json::Map::new();

        if let JsonValue::Object(parent) = &self.0 {
            if let Some(global) = parent.get("global") {
                scoped.insert("global".to_string(), global.clone());
            }

            if let Some(JsonValue::Object(own)) = parent.get(name) {
                for (k, v) in own {
                    scoped.insert(k.clone(), v.clone());
                }
            }
        }

        Values(JsonValue::Object(scoped))
    }

    /// Dependency defaults overlaid with the parent's scoped values
    pub fn for_dependency(defaults: &Values, parent: &Values, name: &str) -> Values {
        let mut result = defaults.clone();
        result.merge(&parent.scope_for_dependency(name));
        result
    }
}

impl From<JsonValue> for Values {
    fn from(value: JsonValue) -> Self {
        Self(value)
    }
}

/// Name of a JSON value's variant, for error messages
pub fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Deep merge two JSON values
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn set_nested(value: &mut JsonValue, path: &[&str], new_value: JsonValue) {
    let Some((key, remaining)) = path.split_first() else {
        *value = new_value;
        return;
    };

    if !value.is_object() {
        *value = JsonValue::Object(serde_json::Map::new());
    }

    if let JsonValue::Object(map) = value {
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
        if remaining.is_empty() {
            *entry = new_value;
        } else {
            set_nested(entry, remaining, new_value);
        }
    }
}

fn get_nested<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let Some((key, remaining)) = path.split_first() else {
        return Some(value);
    };

    match value {
        JsonValue::Object(map) => map.get(*key).and_then(|v| get_nested(v, remaining)),
        _ => None,
    }
}
