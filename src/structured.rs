//! JSON helpers for structured configuration files
//!
//! Structured files are compared key by key. [`differences`] walks two values
//! in lockstep and reports every key that exists on one side only and every
//! leaf (scalar, array or type change) whose value differs. Paths are lists
//! of object keys; arrays are compared as a whole and never indexed.

use crate::error::{MigratusError, Result};
use serde_json::{Map, Value};

/// Kind of a single JSON difference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonDiffKind {
    /// Key only on the new side
    Added,
    /// Key only on the old side
    Removed,
    /// Leaf value changed; `type_changed` when the JSON types differ
    Modified {
        /// Whether the value changed type (e.g. object → string)
        type_changed: bool,
    },
}

/// One difference between two JSON values
#[derive(Debug, Clone, PartialEq)]
pub struct JsonDifference {
    /// Object keys from the root
    pub path: Vec<String>,
    /// What changed
    pub kind: JsonDiffKind,
    /// Old value, absent for additions
    pub old: Option<Value>,
    /// New value, absent for removals
    pub new: Option<Value>,
}

/// Every difference between `old` and `new`, in key order
pub fn differences(old: &Value, new: &Value) -> Vec<JsonDifference> {
    let mut out = Vec::new();
    walk(old, new, &mut Vec::new(), &mut out);
    out
}

fn walk(old: &Value, new: &Value, path: &mut Vec<String>, out: &mut Vec<JsonDifference>) {
    if old == new {
        return;
    }

    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut keys: Vec<&String> = old_map.keys().chain(new_map.keys()).collect();
            keys.sort();
            keys.dedup();

            for key in keys {
                path.push(key.clone());
                match (old_map.get(key), new_map.get(key)) {
                    (Some(o), Some(n)) => walk(o, n, path, out),
                    (Some(o), None) => out.push(JsonDifference {
                        path: path.clone(),
                        kind: JsonDiffKind::Removed,
                        old: Some(o.clone()),
                        new: None,
                    }),
                    (None, Some(n)) => out.push(JsonDifference {
                        path: path.clone(),
                        kind: JsonDiffKind::Added,
                        old: None,
                        new: Some(n.clone()),
                    }),
                    (None, None) => {}
                }
                path.pop();
            }
        }
        _ => out.push(JsonDifference {
            path: path.clone(),
            kind: JsonDiffKind::Modified {
                type_changed: type_name(old) != type_name(new),
            },
            old: Some(old.clone()),
            new: Some(new.clone()),
        }),
    }
}

/// JSON type name used in messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Dotted path, `$` for the root
pub fn format_path(path: &[String]) -> String {
    if path.is_empty() {
        "$".to_string()
    } else {
        path.join(".")
    }
}

/// Pretty-printed JSON
pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Structural size of a value
///
/// Objects count one per key plus the size of each child, arrays the sum of
/// their children, scalars one.
pub fn complexity(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.values().map(|v| 1 + complexity(v)).sum(),
        Value::Array(items) => items.iter().map(complexity).sum(),
        _ => 1,
    }
}

/// Merge `remote` into `local`
///
/// - Objects: union of keys, merged recursively
/// - Arrays: union without duplicates, first-seen order (local first)
/// - Anything else: the remote value wins
pub fn deep_merge(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Object(l), Value::Object(r)) => {
            let mut merged: Map<String, Value> = l.clone();
            for (key, remote_value) in r {
                let value = match l.get(key) {
                    Some(local_value) => deep_merge(local_value, remote_value),
                    None => remote_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        (Value::Array(l), Value::Array(r)) => {
            let mut merged: Vec<Value> = Vec::with_capacity(l.len() + r.len());
            for item in l.iter().chain(r) {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            Value::Array(merged)
        }
        (_, remote) => remote.clone(),
    }
}

/// Whether every element of `a` also appears in `b`
pub fn is_subset(a: &[Value], b: &[Value]) -> bool {
    a.iter().all(|item| b.contains(item))
}

/// Value at `path`
pub fn get_at_path<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(key))
}

/// Set the value at `path`, creating intermediate objects
///
/// # Errors
///
/// - [`MigratusError::StructuredParse`] if an intermediate value is not an object
pub fn set_at_path(root: &mut Value, path: &[String], new_value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        *root = new_value;
        return Ok(());
    };

    let mut current = root;
    for key in parents {
        current = object_mut(current, path)?
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    object_mut(current, path)?.insert(last.clone(), new_value);
    Ok(())
}

/// Remove the key at `path`; returns whether it existed
pub fn remove_at_path(root: &mut Value, path: &[String]) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };
    let mut current = root;
    for key in parents {
        match current.get_mut(key) {
            Some(next) => current = next,
            None => return false,
        }
    }
    current
        .as_object_mut()
        .is_some_and(|map| map.remove(last).is_some())
}

fn object_mut<'a>(value: &'a mut Value, path: &[String]) -> Result<&'a mut Map<String, Value>> {
    let kind = type_name(value);
    value.as_object_mut().ok_or_else(|| MigratusError::StructuredParse {
        path: format_path(path).into(),
        reason: format!("cannot descend into {} while setting value", kind),
    })
}
