//! Import blocks.
//!
//! A template may contain blocks of the form
//!
//! ```yaml
//! $values:
//!   - config: config/base.yaml
//!   - .: { region: eu-west-1 }
//! ```
//!
//! Each entry maps a namespace in the values context (`.` is the root) to an
//! inline map or a YAML file. Blocks are cut out of the template body when it
//! is compiled and applied before the body renders for an item.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::{TemplateError, TemplateResult};
use crate::paths::PathResolver;
use crate::values::ValuesContext;

/// Namespace key addressing the values root.
pub const ROOT_NAMESPACE: &str = ".";

fn block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^\$values:.*\n(?:[ \t]+\S.*\n)*").expect("valid import block pattern")
    })
}

/// Split `source` into its body and its import blocks, in order.
pub fn extract_import_blocks(source: &str) -> (String, Vec<String>) {
    let mut normalized = source.to_string();
    if !normalized.ends_with('\n') {
        normalized.push('\n');
    }

    let blocks = block_pattern()
        .find_iter(&normalized)
        .map(|m| m.as_str().to_string())
        .collect::<Vec<_>>();
    let body = block_pattern().replace_all(&normalized, "").into_owned();
    (body, blocks)
}

/// Apply one rendered import block to `values`.
pub fn apply_import_block(
    rendered: &str,
    values: &ValuesContext,
    resolver: &PathResolver,
    template: &Path,
) -> TemplateResult<()> {
    let invalid = |message: String| TemplateError::InvalidImport {
        template: template.to_path_buf(),
        message,
    };

    let document: Value = serde_yaml::from_str(rendered)?;
    let entries = match document.get("$values") {
        Some(Value::Array(entries)) => entries.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => return Err(invalid(format!("expected a list, found {}", other))),
    };

    for entry in entries {
        let fields = match entry {
            Value::Object(fields) => fields,
            other => return Err(invalid(format!("expected a map, found {}", other))),
        };
        for (key, source) in fields {
            let namespace = (key != ROOT_NAMESPACE).then_some(key.as_str());
            match source {
                Value::Object(map) => values.assign(namespace, &map),
                Value::String(file) => {
                    let resolved = resolver.resolve(&file, template);
                    if !resolved.exists() {
                        warn!("Could not find import {}, skipping", file);
                        continue;
                    }
                    let loaded: Value = serde_yaml::from_str(&fs::read_to_string(&resolved)?)?;
                    match loaded {
                        Value::Object(map) => values.assign(namespace, &map),
                        Value::Null => values.assign(namespace, &Default::default()),
                        other => {
                            return Err(invalid(format!(
                                "{} does not hold a map: {}",
                                resolved.display(),
                                other
                            )))
                        }
                    }
                }
                other => return Err(invalid(format!("unsupported source for {}: {}", key, other))),
            }
        }
    }

    Ok(())
}
