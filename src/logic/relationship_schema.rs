use crate::model::{
    snake_case, KeyKind, ModelDef, ModelError, RelationshipDef, RelationshipKind, Result, Schema,
};
use log::warn;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Derived description of one relationship of a class
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipEntry {
    pub name: String,
    pub kind: RelationshipKind,
    pub target: String,
    /// BelongsTo: column on the owning class.
    /// OneToOne/HasMany: column on the target class pointing back here.
    /// ManyToMany: none.
    pub foreign_key: Option<String>,
    pub reverse: Option<String>,
    pub reverse_kind: Option<RelationshipKind>,
}

/// Relationship entries of one class, by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipTable {
    entries: BTreeMap<String, RelationshipEntry>,
}

impl RelationshipTable {
    pub fn get(&self, name: &str) -> Option<&RelationshipEntry> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelationshipEntry> {
        self.entries.values()
    }

    pub fn of_kind(&self, kind: RelationshipKind) -> impl Iterator<Item = &RelationshipEntry> {
        self.entries.values().filter(move |e| e.kind == kind)
    }

    /// BelongsTo entry whose foreign key lives in `column`
    pub fn by_foreign_key(&self, column: &str) -> Option<&RelationshipEntry> {
        self.of_kind(RelationshipKind::BelongsTo)
            .find(|e| e.foreign_key.as_deref() == Some(column))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Relationship tables derived once per class from the declared schema.
///
/// Tables are computed on first use and stay fixed until `reset`.
#[derive(Debug)]
pub struct RelationshipSchema {
    schema: Schema,
    tables: RwLock<HashMap<String, Arc<RelationshipTable>>>,
}

impl RelationshipSchema {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn model(&self, class: &str) -> Result<&ModelDef> {
        self.schema
            .get_class(class)
            .ok_or_else(|| ModelError::UnknownClass(class.to_string()))
    }

    /// Full table for `class`
    pub fn table(&self, class: &str) -> Result<Arc<RelationshipTable>> {
        if let Some(table) = self.tables.read().get(class) {
            return Ok(table.clone());
        }
        let table = Arc::new(self.derive_table(class)?);
        self.tables
            .write()
            .insert(class.to_string(), table.clone());
        Ok(table)
    }

    /// Entries of `class`, optionally restricted to one kind
    pub fn relationship_table(
        &self,
        class: &str,
        kind: Option<RelationshipKind>,
    ) -> Result<BTreeMap<String, RelationshipEntry>> {
        let table = self.table(class)?;
        Ok(table
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .map(|e| (e.name.clone(), e.clone()))
            .collect())
    }

    pub fn entry(&self, class: &str, relationship: &str) -> Result<RelationshipEntry> {
        self.table(class)?
            .get(relationship)
            .cloned()
            .ok_or_else(|| ModelError::UnknownRelationship {
                class: class.to_string(),
                relationship: relationship.to_string(),
            })
    }

    pub fn relationship_type(&self, class: &str, relationship: &str) -> Result<RelationshipKind> {
        Ok(self.entry(class, relationship)?.kind)
    }

    /// Foreign-key column of a BelongsTo relationship.
    ///
    /// `<name>_<target key column>` when declared, else whichever of
    /// `<name>_uuid`/`<name>_id` is declared, else the conventional name.
    pub fn foreign_key_column_for(&self, class: &str, relationship: &str) -> Result<String> {
        let model = self.model(class)?;
        let rel = model
            .get_relationship(relationship)
            .ok_or_else(|| ModelError::UnknownRelationship {
                class: class.to_string(),
                relationship: relationship.to_string(),
            })?;
        let target_kind = self.model(&rel.target)?.primary_key;
        Ok(Self::column_for(model, &rel.name, target_kind))
    }

    fn column_for(model: &ModelDef, prefix: &str, target_kind: KeyKind) -> String {
        let preferred = format!("{}_{}", prefix, target_kind.column());
        if model.has_column(&preferred) {
            return preferred;
        }
        let alternative = format!("{}_{}", prefix, target_kind.other().column());
        if model.has_column(&alternative) {
            return alternative;
        }
        preferred
    }

    /// BelongsTo entries on any class that point at `class`, with their owner class
    pub fn incoming_belongs_to(&self, class: &str) -> Result<Vec<(String, RelationshipEntry)>> {
        let mut incoming = Vec::new();
        for model in &self.schema.classes {
            let table = self.table(&model.name)?;
            for entry in table.of_kind(RelationshipKind::BelongsTo) {
                if entry.target == class {
                    incoming.push((model.name.clone(), entry.clone()));
                }
            }
        }
        Ok(incoming)
    }

    /// Invalidate every derived table
    pub fn reset(&self) {
        self.tables.write().clear();
    }

    fn derive_table(&self, class: &str) -> Result<RelationshipTable> {
        let model = self.model(class)?;
        let mut entries = BTreeMap::new();
        for rel in &model.relationships {
            let entry = self.derive_entry(model, rel)?;
            entries.insert(entry.name.clone(), entry);
        }
        Ok(RelationshipTable { entries })
    }

    fn derive_entry(&self, model: &ModelDef, rel: &RelationshipDef) -> Result<RelationshipEntry> {
        let target = self.model(&rel.target)?;
        let reverse = Self::find_reverse(model, rel, target);
        if reverse.is_none() && rel.kind != RelationshipKind::ManyToMany {
            warn!(
                "{}.{} has no reverse relationship on {}",
                model.name, rel.name, target.name
            );
        }

        let foreign_key = match rel.kind {
            RelationshipKind::BelongsTo => {
                Some(Self::column_for(model, &rel.name, target.primary_key))
            }
            RelationshipKind::OneToOne | RelationshipKind::HasMany => {
                let prefix = match reverse {
                    Some(r) if r.kind == RelationshipKind::BelongsTo => r.name.clone(),
                    _ => snake_case(&model.name),
                };
                Some(Self::column_for(target, &prefix, model.primary_key))
            }
            RelationshipKind::ManyToMany => None,
        };

        Ok(RelationshipEntry {
            name: rel.name.clone(),
            kind: rel.kind,
            target: rel.target.clone(),
            foreign_key,
            reverse: reverse.map(|r| r.name.clone()),
            reverse_kind: reverse.map(|r| r.kind),
        })
    }

    fn find_reverse<'a>(
        model: &ModelDef,
        rel: &RelationshipDef,
        target: &'a ModelDef,
    ) -> Option<&'a RelationshipDef> {
        if let Some(name) = &rel.reverse {
            return target.get_relationship(name);
        }
        let candidates = rel.kind.reverse_candidates();
        target.relationships.iter().find(|other| {
            other.target == model.name
                && candidates.contains(&other.kind)
                && !(model.name == target.name && other.name == rel.name)
                && other.reverse.as_deref().map_or(true, |r| r == rel.name)
        })
    }
}
