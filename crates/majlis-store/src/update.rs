//! Partial document updates addressed by dotted field paths.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    Increment(i64),
    Delete,
    ArrayUnion(Value),
    ArrayRemove(Value),
}

/// An ordered set of field operations applied to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldUpdate {
    ops: Vec<(String, FieldOp)>,
}

impl FieldUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Serialize>(mut self, field: &str, value: T) -> Result<Self> {
        self.ops
            .push((field.to_string(), FieldOp::Set(serde_json::to_value(value)?)));
        Ok(self)
    }

    pub fn set_value(mut self, field: &str, value: Value) -> Self {
        self.ops.push((field.to_string(), FieldOp::Set(value)));
        self
    }

    pub fn increment(mut self, field: &str, delta: i64) -> Self {
        self.ops.push((field.to_string(), FieldOp::Increment(delta)));
        self
    }

    pub fn delete(mut self, field: &str) -> Self {
        self.ops.push((field.to_string(), FieldOp::Delete));
        self
    }

    pub fn array_union(mut self, field: &str, value: Value) -> Self {
        self.ops.push((field.to_string(), FieldOp::ArrayUnion(value)));
        self
    }

    pub fn array_remove(mut self, field: &str, value: Value) -> Self {
        self.ops.push((field.to_string(), FieldOp::ArrayRemove(value)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[(String, FieldOp)] {
        &self.ops
    }

    /// Apply every operation in order to `doc`.
    pub fn apply(&self, doc: &mut Value) -> Result<()> {
        for (field, op) in &self.ops {
            apply_op(doc, field, op)?;
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidField {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Walk to the parent object of `field`, creating intermediate maps when
/// `create` is set. Returns the parent and the final key.
fn parent_mut<'a>(
    doc: &'a mut Value,
    field: &str,
    create: bool,
) -> Result<Option<(&'a mut Map<String, Value>, String)>> {
    let mut keys: Vec<&str> = field.split('.').collect();
    if keys.iter().any(|k| k.is_empty()) {
        return Err(invalid(field, "empty path segment"));
    }
    let last = keys.pop().unwrap_or_default().to_string();

    let mut current = doc;
    for key in keys {
        let obj = current
            .as_object_mut()
            .ok_or_else(|| invalid(field, "parent is not a map"))?;
        if !obj.contains_key(key) {
            if !create {
                return Ok(None);
            }
            obj.insert(key.to_string(), Value::Object(Map::new()));
        }
        current = obj
            .get_mut(key)
            .ok_or_else(|| invalid(field, "missing parent"))?;
    }

    let obj = current
        .as_object_mut()
        .ok_or_else(|| invalid(field, "parent is not a map"))?;
    Ok(Some((obj, last)))
}

fn apply_op(doc: &mut Value, field: &str, op: &FieldOp) -> Result<()> {
    match op {
        FieldOp::Set(value) => {
            if let Some((obj, key)) = parent_mut(doc, field, true)? {
                obj.insert(key, value.clone());
            }
        }
        FieldOp::Delete => {
            if let Some((obj, key)) = parent_mut(doc, field, false)? {
                obj.remove(&key);
            }
        }
        FieldOp::Increment(delta) => {
            if let Some((obj, key)) = parent_mut(doc, field, true)? {
                let current = match obj.get(&key) {
                    None | Some(Value::Null) => 0,
                    Some(v) => v
                        .as_i64()
                        .ok_or_else(|| invalid(field, "not an integer"))?,
                };
                let next = current
                    .checked_add(*delta)
                    .ok_or_else(|| invalid(field, "integer overflow"))?;
                obj.insert(key, Value::from(next));
            }
        }
        FieldOp::ArrayUnion(value) => {
            if let Some((obj, key)) = parent_mut(doc, field, true)? {
                let entry = obj.entry(key).or_insert_with(|| Value::Array(Vec::new()));
                let arr = entry
                    .as_array_mut()
                    .ok_or_else(|| invalid(field, "not an array"))?;
                if !arr.contains(value) {
                    arr.push(value.clone());
                }
            }
        }
        FieldOp::ArrayRemove(value) => {
            if let Some((obj, key)) = parent_mut(doc, field, false)? {
                if let Some(entry) = obj.get_mut(&key) {
                    let arr = entry
                        .as_array_mut()
                        .ok_or_else(|| invalid(field, "not an array"))?;
                    arr.retain(|v| v != value);
                }
            }
        }
    }
    Ok(())
}
