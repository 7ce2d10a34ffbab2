//! Deep merge of JSON-like trees.
//!
//! Objects merge key by key. Arrays and scalars from the source replace
//! whatever the target held at that key; they are never concatenated.

use serde_json::{Map, Value};

/// Merge `source` into `target` in place and return the target.
///
/// When either side is not an object the target is left untouched.
pub fn merge<'a>(target: &'a mut Value, source: &Value) -> &'a mut Value {
    if let (Value::Object(target_map), Value::Object(source_map)) = (&mut *target, source) {
        merge_maps(target_map, source_map);
    }
    target
}

/// Fold every source into `target`, left to right.
pub fn merge_all<'a, 'b, I>(target: &'a mut Value, sources: I) -> &'a mut Value
where
    I: IntoIterator<Item = &'b Value>,
{
    for source in sources {
        merge(target, source);
    }
    target
}

/// Merge two object maps in place.
pub fn merge_maps(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match value {
            Value::Object(nested) => {
                let slot = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Value::Object(slot_map) = slot {
                    merge_maps(slot_map, nested);
                }
            }
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}
