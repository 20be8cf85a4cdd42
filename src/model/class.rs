use crate::model::{DataType, KeyKind, RelationshipKind};
use serde::{Deserialize, Serialize};

/// Represents a model class declaration within a schema
/// Each class defines the columns and relationships of its instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    /// Name of the class (e.g., "User", "Photo")
    pub name: String,

    /// Kind of primary key; decides whether the key column is `id` or `uuid`
    #[serde(default = "default_key_kind")]
    pub primary_key: KeyKind,

    /// Declared columns, foreign-key columns included
    #[serde(default)]
    pub columns: Vec<ColumnDef>,

    /// Declared relationships
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
}

fn default_key_kind() -> KeyKind {
    KeyKind::Id
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub name: String, // Field name on the instance (e.g., "owner", "photos")
    pub kind: RelationshipKind,
    pub target: String,
    /// Name of the relationship on the target pointing back here.
    /// Inferred from the target's declarations when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverse: Option<String>,
}

impl ModelDef {
    pub fn new(name: &str, primary_key: KeyKind) -> Self {
        Self {
            name: name.to_string(),
            primary_key,
            columns: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, data_type: DataType) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            data_type,
        });
        self
    }

    pub fn relationship(
        mut self,
        name: &str,
        kind: RelationshipKind,
        target: &str,
        reverse: Option<&str>,
    ) -> Self {
        self.relationships.push(RelationshipDef {
            name: name.to_string(),
            kind,
            target: target.to_string(),
            reverse: reverse.map(str::to_string),
        });
        self
    }

    pub fn belongs_to(self, name: &str, target: &str) -> Self {
        self.relationship(name, RelationshipKind::BelongsTo, target, None)
    }

    pub fn has_many(self, name: &str, target: &str, reverse: &str) -> Self {
        self.relationship(name, RelationshipKind::HasMany, target, Some(reverse))
    }

    pub fn one_to_one(self, name: &str, target: &str, reverse: &str) -> Self {
        self.relationship(name, RelationshipKind::OneToOne, target, Some(reverse))
    }

    pub fn many_to_many(self, name: &str, target: &str) -> Self {
        self.relationship(name, RelationshipKind::ManyToMany, target, None)
    }

    pub fn primary_key_column(&self) -> &'static str {
        self.primary_key.column()
    }

    pub fn has_column(&self, name: &str) -> bool {
        name == self.primary_key_column() || self.columns.iter().any(|c| c.name == name)
    }

    pub fn get_relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }
}
