//! The values context shared across one expansion tree.
//!
//! A context is either shared (clones of the handle observe each other's
//! mutations) or isolated from its parent by [`ValuesContext::isolate`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::merge::merge_maps;

/// Key under which the current template location is exposed to templates.
pub const TEMPLATE_KEY: &str = "$template";

/// How values propagate between manifest items and nested expansions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValuesMode {
    /// Every manifest item works on its own deep copy.
    #[default]
    Isolated,
    /// All items and nested expansions mutate one tree.
    Shared,
}

/// Auxiliary data available to templates next to the manifest item.
#[derive(Debug, Clone)]
pub struct ValuesContext {
    data: Arc<RwLock<Map<String, Value>>>,
    template: PathBuf,
    parent: Option<Arc<RwLock<Map<String, Value>>>>,
}

impl Default for ValuesContext {
    fn default() -> Self {
        Self::new(Map::new())
    }
}

impl ValuesContext {
    /// Create a root context from initial data.
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            template: PathBuf::from("."),
            parent: None,
        }
    }

    /// Create a root context from a JSON value; non-objects yield an empty context.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::new(map),
            _ => Self::default(),
        }
    }

    /// Location of the template currently being expanded.
    pub fn template(&self) -> &Path {
        &self.template
    }

    /// Return a handle on the same data pointing at another template.
    pub fn at_template(&self, template: impl Into<PathBuf>) -> Self {
        Self {
            data: Arc::clone(&self.data),
            template: template.into(),
            parent: self.parent.clone(),
        }
    }

    /// Deep-clone the data into a new context whose parent is this one.
    pub fn isolate(&self) -> Self {
        let copy = self.data.read().clone();
        Self {
            data: Arc::new(RwLock::new(copy)),
            template: self.template.clone(),
            parent: Some(Arc::clone(&self.data)),
        }
    }

    /// Prepare the context a manifest item renders with.
    pub fn for_item(&self, mode: ValuesMode) -> Self {
        match mode {
            ValuesMode::Isolated => self.isolate(),
            ValuesMode::Shared => self.clone(),
        }
    }

    /// Deep-merge another context's data into this one.
    pub fn merge(&self, child: &ValuesContext) {
        if Arc::ptr_eq(&self.data, &child.data) {
            return;
        }
        let incoming = child.data.read().clone();
        merge_maps(&mut self.data.write(), &incoming);
    }

    /// Whether this context was produced by [`ValuesContext::isolate`].
    pub fn is_isolated(&self) -> bool {
        self.parent.is_some()
    }

    /// Snapshot of the parent's data, if this context was isolated.
    pub fn parent_snapshot(&self) -> Option<Map<String, Value>> {
        self.parent.as_ref().map(|parent| parent.read().clone())
    }

    /// Whether two handles observe the same data.
    pub fn shares_data_with(&self, other: &ValuesContext) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.data.write().insert(key.into(), value);
    }

    /// Shallow-assign `entries` into the namespace `key`, creating it when
    /// absent. `None` targets the root.
    pub fn assign(&self, key: Option<&str>, entries: &Map<String, Value>) {
        let mut data = self.data.write();
        let target = match key {
            None => &mut *data,
            Some(key) => {
                let slot = data
                    .entry(key.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                match slot {
                    Value::Object(map) => map,
                    _ => return,
                }
            }
        };
        for (k, v) in entries {
            target.insert(k.clone(), v.clone());
        }
    }

    /// The data as a JSON object, with the template location under
    /// [`TEMPLATE_KEY`].
    pub fn to_value(&self) -> Value {
        let mut map = self.data.read().clone();
        map.insert(
            TEMPLATE_KEY.to_string(),
            Value::String(self.template.to_string_lossy().into_owned()),
        );
        Value::Object(map)
    }
}
