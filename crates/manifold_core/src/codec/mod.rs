//! Document codecs.
//!
//! Input documents are parsed into `serde_json::Value` trees; output payloads
//! are serialized according to the extension of their destination.

pub mod xml;

use std::path::Path;

use serde_json::Value;

use crate::error::{EngineError, EngineResult};

/// Output format selected by a destination's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
    Xml,
    /// Any other extension: only string payloads can be written.
    Raw,
}

impl Format {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let extension = path
            .as_ref()
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase());
        match extension.as_deref() {
            Some("yaml") | Some("yml") => Format::Yaml,
            Some("json") => Format::Json,
            Some("xml") => Format::Xml,
            _ => Format::Raw,
        }
    }
}

/// Parse an input document, choosing the XML reader for `.xml` files.
pub fn parse(text: &str, path: &Path) -> EngineResult<Value> {
    if Format::from_path(path) == Format::Xml {
        return xml::parse(text);
    }
    Ok(serde_yaml::from_str(text)?)
}

/// Serialize `tree` for the destination `target`.
pub fn serialize(tree: &Value, target: &str) -> EngineResult<String> {
    match Format::from_path(target) {
        Format::Yaml => Ok(serde_yaml::to_string(tree)?),
        Format::Json => Ok(serde_json::to_string(tree)?),
        Format::Xml => xml::to_string(tree),
        Format::Raw => match tree {
            Value::String(text) => Ok(text.clone()),
            _ => Err(EngineError::UnsupportedExtension(target.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_from_path() {
        assert_eq!(Format::from_path("a/b.YAML"), Format::Yaml);
        assert_eq!(Format::from_path("b.yml"), Format::Yaml);
        assert_eq!(Format::from_path("b.json"), Format::Json);
        assert_eq!(Format::from_path("b.xml"), Format::Xml);
        assert_eq!(Format::from_path("Dockerfile"), Format::Raw);
    }

    #[test]
    fn test_serialize_keeps_key_order() {
        let tree = json!({"z": 1, "a": {"b": [1, 2]}});
        assert_eq!(serialize(&tree, "o.json").unwrap(), r#"{"z":1,"a":{"b":[1,2]}}"#);
        assert_eq!(
            serialize(&tree, "o.yaml").unwrap(),
            "z: 1\na:\n  b:\n  - 1\n  - 2\n"
        );
    }

    #[test]
    fn test_raw_requires_string() {
        assert_eq!(serialize(&json!("FROM alpine"), "Dockerfile").unwrap(), "FROM alpine");
        assert!(matches!(
            serialize(&json!({"a": 1}), "notes.txt"),
            Err(EngineError::UnsupportedExtension(_))
        ));
    }
}
