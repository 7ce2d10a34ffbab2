//! Assembly of the root values context from `--values` and `--valueFile`.

use std::path::Path;

use anyhow::{Context, Result};
use manifold_templates::{load_documents, ValuesContext};
use serde_json::map::Entry;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::form_urlencoded;

/// Parse one querystring (`k=v&k2=v2`).
///
/// A key given more than once within the querystring collects its values
/// into a list.
pub fn parse_query(query: &str) -> Map<String, Value> {
    let mut values = Map::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let value = Value::String(value.into_owned());
        match values.entry(key.into_owned()) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                Value::Array(list) => list.push(value),
                existing => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
            },
        }
    }
    values
}

/// Load a `[name=]path` value file into `values[name]`.
///
/// Every document of the file is shallow-merged, later documents winning.
/// The name defaults to the file stem. An existing `values[name]` is
/// replaced, not merged.
pub fn load_value_file(spec: &str, values: &mut Map<String, Value>) -> Result<()> {
    let (name, path) = match spec.split_once('=') {
        Some((name, path)) if !name.is_empty() => (name.to_string(), Path::new(path)),
        _ => {
            let path = Path::new(spec);
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .with_context(|| format!("Cannot derive a values name from '{}'", spec))?;
            (stem, path)
        }
    };

    let documents = load_documents(path)
        .with_context(|| format!("Failed to load value file {}", path.display()))?;

    let mut merged = Map::new();
    for document in documents {
        match document {
            Value::Object(fields) => merged.extend(fields),
            Value::Null => {}
            _ => warn!(
                "Ignoring non-mapping document in value file {}",
                path.display()
            ),
        }
    }

    debug!("Loaded value file {} as '{}'", path.display(), name);
    values.insert(name, Value::Object(merged));
    Ok(())
}

/// Build the root values.
///
/// Querystrings are applied in order, a later `--values` replacing keys of an
/// earlier one. Value files are applied last and win over querystring keys.
pub fn assemble<S: AsRef<str>>(queries: &[S], value_files: &[S]) -> Result<ValuesContext> {
    let mut values = Map::new();
    for query in queries {
        values.extend(parse_query(query.as_ref()));
    }
    for spec in value_files {
        load_value_file(spec.as_ref(), &mut values)?;
    }

    Ok(ValuesContext::new(values))
}
