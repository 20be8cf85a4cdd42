use crate::model::{Columns, KeyValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Index of a model class inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub(crate) u32);

/// Handle to one in-memory copy of a record.
///
/// Many handles may describe the same logical record; two handles are the same
/// copy only when they are equal. Slots are never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceRef {
    pub(crate) class: ClassId,
    pub(crate) slot: u32,
}

impl InstanceRef {
    pub fn class_id(&self) -> ClassId {
        self.class
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.class.0, self.slot)
    }
}

/// A single column write recorded while revision tracking is on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub column: String,
    pub from: Value,
    pub to: Value,
    pub at: DateTime<Utc>,
}

/// Arena entry: column state of one in-memory copy.
#[derive(Debug, Clone, Default)]
pub struct Instance {
    pub(crate) columns: Columns,
    pub(crate) changes: Option<Vec<Change>>,
    pub(crate) errors: HashMap<String, String>,
}

impl Instance {
    pub(crate) fn new(columns: Columns, track_revisions: bool) -> Self {
        Self {
            columns,
            changes: track_revisions.then(Vec::new),
            errors: HashMap::new(),
        }
    }

    pub fn column(&self, name: &str) -> &Value {
        self.columns.get(name).unwrap_or(&Value::Null)
    }

    pub fn key(&self, column: &str) -> Option<KeyValue> {
        KeyValue::from_value(self.column(column))
    }

    /// Overwrite a column, recording the change when tracking is enabled
    pub(crate) fn write(&mut self, column: &str, value: Value) {
        let previous = self
            .columns
            .insert(column.to_string(), value.clone())
            .unwrap_or(Value::Null);
        if let Some(changes) = &mut self.changes {
            changes.push(Change {
                column: column.to_string(),
                from: previous,
                to: value,
                at: Utc::now(),
            });
        }
    }
}

/// Resolved value of a relationship field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationValue {
    One(Option<InstanceRef>),
    Many(Vec<InstanceRef>),
}

impl RelationValue {
    pub fn one(&self) -> Option<InstanceRef> {
        match self {
            RelationValue::One(value) => *value,
            RelationValue::Many(_) => None,
        }
    }

    pub fn many(&self) -> &[InstanceRef] {
        match self {
            RelationValue::One(_) => &[],
            RelationValue::Many(items) => items,
        }
    }

    pub fn contains(&self, instance: InstanceRef) -> bool {
        match self {
            RelationValue::One(value) => *value == Some(instance),
            RelationValue::Many(items) => items.contains(&instance),
        }
    }
}

impl From<InstanceRef> for RelationValue {
    fn from(value: InstanceRef) -> Self {
        RelationValue::One(Some(value))
    }
}

impl From<Option<InstanceRef>> for RelationValue {
    fn from(value: Option<InstanceRef>) -> Self {
        RelationValue::One(value)
    }
}

impl From<Vec<InstanceRef>> for RelationValue {
    fn from(value: Vec<InstanceRef>) -> Self {
        RelationValue::Many(value)
    }
}

/// Input for `build`/`insert`: plain columns plus relationship assignments
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    pub columns: Columns,
    pub relationships: Vec<(String, RelationValue)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.columns.insert(name.to_string(), value.into());
        self
    }

    pub fn relationship(mut self, name: &str, value: impl Into<RelationValue>) -> Self {
        self.relationships.push((name.to_string(), value.into()));
        self
    }
}

impl From<Columns> for Attributes {
    fn from(columns: Columns) -> Self {
        Self {
            columns,
            relationships: Vec::new(),
        }
    }
}
