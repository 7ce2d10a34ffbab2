//! Manifest loading and merge-by-name.
//!
//! A manifest is an ordered list of named items. Several sources (inline
//! items or multi-document YAML files) may contribute to one manifest; items
//! that share a `name` are deep-merged into the position of their first
//! occurrence.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{TemplateError, TemplateResult};
use crate::merge::merge;
use crate::paths::PathResolver;

/// One contributor to a manifest.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestSource {
    /// A single item, or a sequence of items, given inline.
    Inline(Value),
    /// A YAML file holding one item per document.
    File(PathBuf),
}

impl ManifestSource {
    /// Interpret a directive's `$manifest` value.
    ///
    /// A string names a file; a sequence may mix file names and inline items.
    pub fn from_directive(value: &Value) -> Vec<ManifestSource> {
        match value {
            Value::String(path) => vec![ManifestSource::File(PathBuf::from(path))],
            Value::Array(entries) => entries
                .iter()
                .map(|entry| match entry {
                    Value::String(path) => ManifestSource::File(PathBuf::from(path)),
                    other => ManifestSource::Inline(other.clone()),
                })
                .collect(),
            other => vec![ManifestSource::Inline(other.clone())],
        }
    }

    fn describe(&self) -> String {
        match self {
            ManifestSource::Inline(_) => "inline".to_string(),
            ManifestSource::File(path) => path.display().to_string(),
        }
    }
}

/// Parse every document of a YAML stream.
pub fn parse_documents(text: &str) -> TemplateResult<Vec<Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        documents.push(Value::deserialize(document)?);
    }
    Ok(documents)
}

/// Load every document of a YAML file.
pub fn load_documents(path: &Path) -> TemplateResult<Vec<Value>> {
    let content = fs::read_to_string(path)?;
    parse_documents(&content)
}

/// Load the items of a manifest file without merging them by name.
///
/// Null documents are dropped and list documents contribute each entry.
pub fn load_items(path: &Path) -> TemplateResult<Vec<Value>> {
    Ok(load_documents(path)?
        .into_iter()
        .filter(|doc| !doc.is_null())
        .flat_map(flatten)
        .collect())
}

/// The declared name of a manifest item.
pub fn item_name(item: &Value) -> Option<String> {
    match item.get("name")? {
        Value::String(name) if !name.is_empty() => Some(name.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

/// Combines manifest sources into one ordered item list.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestMerger {
    resolver: PathResolver,
}

impl ManifestMerger {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    /// Merge `sources` into an ordered list of items.
    ///
    /// File sources resolve against `template_location`; missing files are
    /// skipped with a warning. An item without a name is an error.
    pub fn merge(
        &self,
        sources: &[ManifestSource],
        template_location: &Path,
    ) -> TemplateResult<Vec<Value>> {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut items: Vec<Value> = Vec::new();

        for source in sources {
            let candidates = match source {
                ManifestSource::File(path) => {
                    let resolved = self.resolver.resolve(path, template_location);
                    if !resolved.exists() {
                        warn!("Could not find manifest {}, skipping", resolved.display());
                        continue;
                    }
                    debug!("Loading manifest from {:?}", resolved);
                    load_items(&resolved)?
                }
                ManifestSource::Inline(value) => flatten(value.clone()),
            };

            for item in candidates {
                let name = item_name(&item).ok_or_else(|| TemplateError::MissingName {
                    source_name: source.describe(),
                })?;
                match positions.get(&name) {
                    Some(&index) => {
                        merge(&mut items[index], &item);
                    }
                    None => {
                        positions.insert(name, items.len());
                        items.push(item);
                    }
                }
            }
        }

        Ok(items)
    }
}

fn flatten(value: Value) -> Vec<Value> {
    match value {
        Value::Array(entries) => entries,
        other => vec![other],
    }
}
