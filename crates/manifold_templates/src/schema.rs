//! JSON-Schema validation of manifest items.
//!
//! Declared `default`s are written into the item before validation so that
//! templates can rely on them.

use std::fmt;
use std::fs;
use std::path::Path;

use jsonschema::JSONSchema;
use serde_json::{json, Value};

use crate::error::{TemplateError, TemplateResult};

/// A single violation reported by the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON pointer to the offending value.
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{}: {}", path, self.message)
    }
}

/// A compiled schema.
pub struct SchemaValidator {
    schema: Value,
    compiled: JSONSchema,
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("schema", &self.schema)
            .finish()
    }
}

impl SchemaValidator {
    /// Compile a schema document.
    pub fn compile(schema: &Value) -> TemplateResult<Self> {
        let compiled = JSONSchema::compile(schema)
            .map_err(|e| TemplateError::InvalidSchema(e.to_string()))?;
        Ok(Self {
            schema: schema.clone(),
            compiled,
        })
    }

    /// Load and compile a YAML or JSON schema file.
    pub fn from_file(path: &Path) -> TemplateResult<Self> {
        let content = fs::read_to_string(path)?;
        let schema: Value = serde_yaml::from_str(&content)?;
        Self::compile(&schema)
    }

    /// The schema used when none is supplied: an object with a string `name`.
    pub fn named_items() -> TemplateResult<Self> {
        Self::compile(&default_schema())
    }

    /// Accepts any object.
    pub fn any_object() -> TemplateResult<Self> {
        Self::compile(&json!({"type": "object"}))
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Apply declared defaults to `item`, then validate it.
    pub fn validate(&self, item: &mut Value) -> Result<(), Vec<SchemaViolation>> {
        apply_defaults(&self.schema, item);
        self.check(item)
    }

    /// Validate without touching the item.
    pub fn check(&self, item: &Value) -> Result<(), Vec<SchemaViolation>> {
        match self.compiled.validate(item) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors
                .map(|error| SchemaViolation {
                    path: error.instance_path.to_string(),
                    message: error.to_string(),
                })
                .collect()),
        }
    }
}

/// `{type: object, properties: {name: {type: string}}, required: [name]}`.
pub fn default_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "name": { "type": "string" } },
        "required": ["name"],
        "additionalProperties": true
    })
}

/// Fill in `default` values declared under `properties`, recursively.
pub fn apply_defaults(schema: &Value, instance: &mut Value) {
    let (Some(properties), Value::Object(map)) = (
        schema.get("properties").and_then(Value::as_object),
        instance,
    ) else {
        return;
    };

    for (key, property) in properties {
        match map.get_mut(key) {
            Some(existing) => apply_defaults(property, existing),
            None => {
                if let Some(default) = property.get("default") {
                    let mut value = default.clone();
                    apply_defaults(property, &mut value);
                    map.insert(key.clone(), value);
                }
            }
        }
    }
}
