//! Collection queries: equality/range filters, a single ordering, and a limit.

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::Value;

use crate::document::{lookup, validate_collection, Document};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    /// Documents lacking the field, or holding a value of another type, never match.
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = lookup(&doc.data, &self.field) else {
            return false;
        };
        let Some(ord) = compare(actual, &self.value) else {
            return self.op == FilterOp::Ne;
        };
        match self.op {
            FilterOp::Eq => ord == Ordering::Equal,
            FilterOp::Ne => ord != Ordering::Equal,
            FilterOp::Lt => ord == Ordering::Less,
            FilterOp::Le => ord != Ordering::Greater,
            FilterOp::Gt => ord == Ordering::Greater,
            FilterOp::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: &str) -> Result<Self> {
        validate_collection(collection)?;
        Ok(Self {
            collection: collection.to_string(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        })
    }

    pub fn filter<T: Serialize>(mut self, field: &str, op: FilterOp, value: T) -> Result<Self> {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: serde_json::to_value(value)?,
        });
        Ok(self)
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document at this path could appear in the result set.
    pub fn watches_collection(&self, collection: &str) -> bool {
        self.collection == collection
    }

    pub fn matches(&self, doc: &Document) -> bool {
        doc.path.collection() == self.collection && self.filters.iter().all(|f| f.matches(doc))
    }

    /// Filter, order and truncate documents already scoped to the collection.
    pub fn evaluate(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).collect();

        match &self.order_by {
            Some((field, direction)) => {
                // Documents missing the order field are excluded from ordered queries.
                out.retain(|d| lookup(&d.data, field).is_some());
                out.sort_by(|a, b| {
                    let ord = compare_or_type(
                        lookup(&a.data, field).unwrap_or(&Value::Null),
                        lookup(&b.data, field).unwrap_or(&Value::Null),
                    );
                    let ord = match direction {
                        Direction::Ascending => ord,
                        Direction::Descending => ord.reverse(),
                    };
                    ord.then_with(|| a.path.cmp(&b.path))
                });
            }
            None => out.sort_by(|a, b| a.path.cmp(&b.path)),
        }

        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

/// Compare two JSON scalars of the same type.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            (a == b).then_some(Ordering::Equal)
        }
        _ => None,
    }
}

/// Total order across types for sorting: null < bool < number < string < other.
fn compare_or_type(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    compare(a, b).unwrap_or_else(|| rank(a).cmp(&rank(b)))
}
