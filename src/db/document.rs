use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::DbError;
use crate::constants::{ID_FIELD, VERSION_FIELD};

/// A stored document: a JSON object keyed by `_id`.
pub type Document = Map<String, Value>;

/// Returns the `_id` of a document when it is a string.
pub fn document_id(document: &Document) -> Option<&str> {
    document.get(ID_FIELD).and_then(Value::as_str)
}

/// Returns the optimistic-concurrency version of a document.
pub fn document_version(document: &Document) -> Option<i64> {
    document.get(VERSION_FIELD).and_then(Value::as_i64)
}

/// Reads the value at a dotted path (`auth.isBlocked`).
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The field is present and contains the value.
    Eq(Value),
    /// The field is absent or does not contain the value.
    Ne(Value),
}

/// Conjunction of conditions on dotted field paths.
///
/// Matching follows JSONB containment so that every backend agrees: an
/// object value matches when each of its keys matches, an array value
/// matches when each element is found in the stored array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::new().eq(ID_FIELD, id)
    }

    pub fn by_id_and_version(id: &str, version: i64) -> Self {
        Self::by_id(id).eq(VERSION_FIELD, version)
    }

    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push((path.into(), Condition::Eq(value.into())));
        self
    }

    pub fn ne(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push((path.into(), Condition::Ne(value.into())));
        self
    }

    pub fn conditions(&self) -> &[(String, Condition)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.conditions.iter().all(|(path, condition)| {
            let pattern = nest(path, condition_value(condition).clone());
            let contained = contains_object(document, &pattern);
            match condition {
                Condition::Eq(_) => contained,
                Condition::Ne(_) => !contained,
            }
        })
    }

    /// Merged containment pattern of every `eq` condition.
    pub fn eq_pattern(&self) -> Document {
        let mut pattern = Map::new();
        for (path, condition) in &self.conditions {
            if let Condition::Eq(value) = condition {
                merge(&mut pattern, nest(path, value.clone()));
            }
        }
        pattern
    }

    /// One containment pattern per `ne` condition.
    pub fn ne_patterns(&self) -> Vec<Document> {
        self.conditions
            .iter()
            .filter_map(|(path, condition)| match condition {
                Condition::Ne(value) => Some(nest(path, value.clone())),
                Condition::Eq(_) => None,
            })
            .collect()
    }
}

fn condition_value(condition: &Condition) -> &Value {
    match condition {
        Condition::Eq(value) | Condition::Ne(value) => value,
    }
}

/// `a.b.c` + value → `{"a": {"b": {"c": value}}}`
fn nest(path: &str, value: Value) -> Document {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().unwrap_or(path);
    let mut inner = Map::new();
    inner.insert(last.to_string(), value);
    for segment in segments.into_iter().rev() {
        let mut outer = Map::new();
        outer.insert(segment.to_string(), Value::Object(inner));
        inner = outer;
    }
    inner
}

fn merge(target: &mut Document, source: Document) {
    for (key, value) in source {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge(existing, incoming),
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

fn contains(target: &Value, pattern: &Value) -> bool {
    match (target, pattern) {
        (Value::Object(target), Value::Object(pattern)) => contains_object(target, pattern),
        (Value::Array(target), Value::Array(pattern)) => pattern
            .iter()
            .all(|wanted| target.iter().any(|item| contains(item, wanted))),
        (Value::Array(target), scalar) if !scalar.is_object() => {
            target.iter().any(|item| item == scalar)
        }
        (target, pattern) => target == pattern,
    }
}

fn contains_object(target: &Document, pattern: &Document) -> bool {
    pattern
        .iter()
        .all(|(key, wanted)| target.get(key).is_some_and(|value| contains(value, wanted)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    /// `createdAt` sorts ascending, `-createdAt` descending.
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(field) => Sort {
                field: field.to_string(),
                direction: SortDirection::Descending,
            },
            None => Sort {
                field: spec.trim_start_matches('+').to_string(),
                direction: SortDirection::Ascending,
            },
        }
    }

    /// Orders two documents the way Postgres orders `data #> path`:
    /// missing values sort last when ascending.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let ordering = match (lookup(a, &self.field), lookup(b, &self.field)) {
            (Some(a), Some(b)) => compare_values(a, b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        match self.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => a.len().cmp(&b.len()),
        (Value::Object(a), Value::Object(b)) => a.len().cmp(&b.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub sort: Option<Sort>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Set(String, Value),
    Inc(String, i64),
}

/// Ordered field mutations applied to one matched document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    operations: Vec<Operation>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.operations.push(Operation::Set(path.into(), value.into()));
        self
    }

    pub fn inc(mut self, path: impl Into<String>, delta: i64) -> Self {
        self.operations.push(Operation::Inc(path.into(), delta));
        self
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn apply(&self, document: &mut Document) -> Result<(), DbError> {
        for operation in &self.operations {
            match operation {
                Operation::Set(path, value) => {
                    if path == ID_FIELD {
                        return Err(DbError::InvalidUpdate("_id is immutable".to_string()));
                    }
                    *slot(document, path)? = value.clone();
                }
                Operation::Inc(path, delta) => {
                    let target = slot(document, path)?;
                    let current = match target {
                        Value::Null => 0,
                        Value::Number(n) => n.as_i64().ok_or_else(|| {
                            DbError::InvalidUpdate(format!("{path} is not an integer"))
                        })?,
                        _ => {
                            return Err(DbError::InvalidUpdate(format!(
                                "{path} is not a number"
                            )))
                        }
                    };
                    *target = Value::from(current + delta);
                }
            }
        }
        Ok(())
    }
}

/// Mutable slot at a dotted path, creating intermediate objects.
fn slot<'a>(document: &'a mut Document, path: &str) -> Result<&'a mut Value, DbError> {
    let mut segments = path.split('.').peekable();
    let mut current = document;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            return Ok(current.entry(segment.to_string()).or_insert(Value::Null));
        }
        let next = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if next.is_null() {
            *next = Value::Object(Map::new());
        }
        current = next
            .as_object_mut()
            .ok_or_else(|| DbError::InvalidUpdate(format!("{segment} is not an object")))?;
    }
    Err(DbError::InvalidUpdate("empty field path".to_string()))
}
