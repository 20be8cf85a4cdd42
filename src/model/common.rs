use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Column name -> value map used for records and build attributes.
pub type Columns = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DataType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
}

/// How a class identifies its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Numeric key stored in the `id` column
    Id,
    /// String key stored in the `uuid` column
    Uuid,
}

impl KeyKind {
    /// Column holding the primary key, also used as the foreign-key suffix
    pub fn column(&self) -> &'static str {
        match self {
            KeyKind::Id => "id",
            KeyKind::Uuid => "uuid",
        }
    }

    pub fn other(&self) -> KeyKind {
        match self {
            KeyKind::Id => KeyKind::Uuid,
            KeyKind::Uuid => KeyKind::Id,
        }
    }
}

/// A primary-key value. Hashable so it can index the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Uuid(String),
}

impl KeyValue {
    /// Read a key out of a column value. `null` is not a key.
    pub fn from_value(value: &Value) -> Option<KeyValue> {
        match value {
            Value::Number(n) => n.as_i64().map(KeyValue::Int),
            Value::String(s) => Some(KeyValue::Uuid(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            KeyValue::Int(i) => Value::from(*i),
            KeyValue::Uuid(s) => Value::String(s.clone()),
        }
    }

    pub fn kind(&self) -> KeyKind {
        match self {
            KeyValue::Int(_) => KeyKind::Id,
            KeyValue::Uuid(_) => KeyKind::Uuid,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(i) => write!(f, "{}", i),
            KeyValue::Uuid(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Int(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Uuid(value.to_string())
    }
}

/// Value of an optional key column as JSON.
pub fn key_to_value(key: Option<&KeyValue>) -> Value {
    key.map(KeyValue::to_value).unwrap_or(Value::Null)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipKind {
    BelongsTo,
    OneToOne,
    HasMany,
    ManyToMany,
}

impl RelationshipKind {
    /// BelongsTo and OneToOne hold a single target, the others hold lists.
    pub fn is_single(&self) -> bool {
        matches!(self, RelationshipKind::BelongsTo | RelationshipKind::OneToOne)
    }

    /// Kinds that may sit on the other end of a relationship of this kind.
    pub fn reverse_candidates(&self) -> &'static [RelationshipKind] {
        match self {
            RelationshipKind::BelongsTo => &[RelationshipKind::HasMany, RelationshipKind::OneToOne],
            RelationshipKind::OneToOne | RelationshipKind::HasMany => &[RelationshipKind::BelongsTo],
            RelationshipKind::ManyToMany => &[RelationshipKind::ManyToMany],
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationshipKind::BelongsTo => "BelongsTo",
            RelationshipKind::OneToOne => "OneToOne",
            RelationshipKind::HasMany => "HasMany",
            RelationshipKind::ManyToMany => "ManyToMany",
        };
        f.write_str(name)
    }
}

pub fn generate_uuid() -> KeyValue {
    KeyValue::Uuid(Uuid::new_v4().to_string())
}

/// `BlogPost` -> `blog_post`
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Column equality. Two RFC 3339 timestamps naming the same instant are
/// equal however they are written.
pub fn same_value(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a.as_str(), b.as_str()) {
        (Some(a), Some(b)) => match (
            chrono::DateTime::parse_from_rfc3339(a),
            chrono::DateTime::parse_from_rfc3339(b),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        },
        _ => false,
    }
}
