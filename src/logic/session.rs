use crate::config::ModelConfig;
use crate::logic::collection::InstanceCollection;
use crate::logic::relationship_schema::{RelationshipEntry, RelationshipSchema};
use crate::model::{
    key_to_value, Attributes, Change, ClassId, Columns, Instance, InstanceRef, KeyKind, KeyValue,
    ModelDef, ModelError, RelationValue, RelationshipKind, Result, Schema,
};
use crate::store::{InstanceRegistry, RelationshipCache};
use log::debug;
use serde_json::Value;
use std::collections::HashMap;

/// Registry, relationship cache and instance arena of one model class
#[derive(Debug)]
pub(crate) struct ClassContext {
    pub(crate) def: ModelDef,
    pub(crate) instances: Vec<Option<Instance>>,
    pub(crate) registry: InstanceRegistry,
    pub(crate) cache: RelationshipCache,
    /// Canonical instance slot per persisted key
    pub(crate) persisted: HashMap<KeyValue, u32>,
}

impl ClassContext {
    fn new(def: ModelDef) -> Self {
        Self {
            def,
            instances: Vec::new(),
            registry: InstanceRegistry::new(),
            cache: RelationshipCache::new(),
            persisted: HashMap::new(),
        }
    }

    /// Unload everything. The arena keeps its length so slots stay unique.
    fn clear(&mut self) {
        self.instances.iter_mut().for_each(|slot| *slot = None);
        self.registry.clear();
        self.cache.clear_all();
        self.persisted.clear();
    }
}

/// Every live in-memory copy of every model, with the state that keeps their
/// keys and relationships coherent.
///
/// All operations are synchronous. Share a session through `Database` when
/// relationship reads need the adapter.
#[derive(Debug)]
pub struct Session {
    pub(crate) relationships: RelationshipSchema,
    pub(crate) classes: Vec<ClassContext>,
    class_ids: HashMap<String, ClassId>,
    track_revisions: bool,
}

impl Session {
    pub fn new(schema: Schema) -> Result<Self> {
        Self::with_config(schema, &ModelConfig::default())
    }

    pub fn with_config(schema: Schema, config: &ModelConfig) -> Result<Self> {
        schema.validate()?;
        let mut classes = Vec::with_capacity(schema.classes.len());
        let mut class_ids = HashMap::new();
        for (index, def) in schema.classes.iter().enumerate() {
            class_ids.insert(def.name.clone(), ClassId(index as u32));
            classes.push(ClassContext::new(def.clone()));
        }
        Ok(Self {
            relationships: RelationshipSchema::new(schema),
            classes,
            class_ids,
            track_revisions: config.track_revisions,
        })
    }

    pub fn schema(&self) -> &RelationshipSchema {
        &self.relationships
    }

    pub fn class_id(&self, name: &str) -> Result<ClassId> {
        self.class_ids
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::UnknownClass(name.to_string()))
    }

    pub fn class_name(&self, class: ClassId) -> &str {
        &self.ctx(class).def.name
    }

    pub fn model(&self, class: ClassId) -> &ModelDef {
        &self.ctx(class).def
    }

    pub(crate) fn ctx(&self, class: ClassId) -> &ClassContext {
        &self.classes[class.0 as usize]
    }

    pub(crate) fn ctx_mut(&mut self, class: ClassId) -> &mut ClassContext {
        &mut self.classes[class.0 as usize]
    }

    fn unloaded(&self, r: InstanceRef) -> ModelError {
        ModelError::InstanceUnloaded {
            class: self.class_name(r.class).to_string(),
            slot: r.slot,
        }
    }

    pub(crate) fn instance(&self, r: InstanceRef) -> Result<&Instance> {
        self.ctx(r.class)
            .instances
            .get(r.slot as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| self.unloaded(r))
    }

    pub(crate) fn instance_mut(&mut self, r: InstanceRef) -> Result<&mut Instance> {
        let ctx = &mut self.classes[r.class.0 as usize];
        match ctx.instances.get_mut(r.slot as usize).and_then(Option::as_mut) {
            Some(instance) => Ok(instance),
            None => Err(ModelError::InstanceUnloaded {
                class: ctx.def.name.clone(),
                slot: r.slot,
            }),
        }
    }

    pub fn is_loaded(&self, r: InstanceRef) -> bool {
        self.instance(r).is_ok()
    }

    pub(crate) fn entry(&self, class: ClassId, name: &str) -> Result<RelationshipEntry> {
        self.relationships.entry(self.class_name(class), name)
    }

    /// Key of a loaded instance; `None` when unkeyed or unloaded
    pub(crate) fn key_of(&self, r: InstanceRef) -> Option<KeyValue> {
        let column = self.model(r.class).primary_key_column();
        self.instance(r).ok().and_then(|i| i.key(column))
    }

    pub fn primary_key(&self, r: InstanceRef) -> Result<Option<KeyValue>> {
        let column = self.model(r.class).primary_key_column();
        Ok(self.instance(r)?.key(column))
    }

    pub fn get(&self, r: InstanceRef, column: &str) -> Result<Value> {
        Ok(self.instance(r)?.column(column).clone())
    }

    pub fn columns(&self, r: InstanceRef) -> Result<&Columns> {
        Ok(&self.instance(r)?.columns)
    }

    pub fn changes(&self, r: InstanceRef) -> Result<&[Change]> {
        Ok(self.instance(r)?.changes.as_deref().unwrap_or(&[]))
    }

    pub fn is_dirty(&self, r: InstanceRef) -> Result<bool> {
        Ok(!self.changes(r)?.is_empty())
    }

    pub fn clear_changes(&mut self, r: InstanceRef) -> Result<()> {
        if let Some(changes) = &mut self.instance_mut(r)?.changes {
            changes.clear();
        }
        Ok(())
    }

    pub fn errors(&self, r: InstanceRef) -> Result<&HashMap<String, String>> {
        Ok(&self.instance(r)?.errors)
    }

    pub fn record_error(&mut self, r: InstanceRef, column: &str, message: &str) -> Result<()> {
        self.instance_mut(r)?
            .errors
            .insert(column.to_string(), message.to_string());
        Ok(())
    }

    /// Parse a key column value, rejecting values of the wrong kind
    pub(crate) fn parse_key(
        &self,
        class: ClassId,
        column: &str,
        value: &Value,
        kind: KeyKind,
    ) -> Result<Option<KeyValue>> {
        if value.is_null() {
            return Ok(None);
        }
        match KeyValue::from_value(value) {
            Some(key) if key.kind() == kind => Ok(Some(key)),
            _ => Err(ModelError::InvalidKey {
                class: self.class_name(class).to_string(),
                column: column.to_string(),
                value: value.clone(),
            }),
        }
    }

    // ---- registry views ----

    fn refs(class: ClassId, slots: &[u32]) -> Vec<InstanceRef> {
        slots.iter().map(|slot| InstanceRef { class, slot: *slot }).collect()
    }

    /// Every copy of the same logical record, `r` included, oldest first
    pub fn references_of(&self, r: InstanceRef) -> Result<Vec<InstanceRef>> {
        self.instance(r)?;
        Ok(self.group_members(r))
    }

    pub(crate) fn group_members(&self, r: InstanceRef) -> Vec<InstanceRef> {
        self.ctx(r.class)
            .registry
            .references_of(r.slot)
            .map(|g| Self::refs(r.class, &g.members))
            .unwrap_or_default()
    }

    /// Whether two handles are copies of the same logical record
    pub fn same_record(&self, a: InstanceRef, b: InstanceRef) -> bool {
        if a == b {
            return true;
        }
        if a.class != b.class {
            return false;
        }
        let registry = &self.ctx(a.class).registry;
        match (registry.group_of(a.slot), registry.group_of(b.slot)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Members of the Known Instance Set for `key`; empty when none exists
    pub fn known_set_for(&self, class: &str, key: &KeyValue) -> Result<Vec<InstanceRef>> {
        let class = self.class_id(class)?;
        let registry = &self.ctx(class).registry;
        Ok(registry
            .known_group(key)
            .and_then(|group| registry.group(group))
            .map(|g| Self::refs(class, &g.members))
            .unwrap_or_default())
    }

    pub fn unknown_groups(&self, class: &str) -> Result<Vec<Vec<InstanceRef>>> {
        let class = self.class_id(class)?;
        Ok(self
            .ctx(class)
            .registry
            .unknown_groups()
            .map(|g| Self::refs(class, &g.members))
            .collect())
    }

    /// Known Instance Sets and Unknown Groups of a class
    pub fn all_groups_for(&self, class: &str) -> Result<Vec<(Option<KeyValue>, Vec<InstanceRef>)>> {
        let class = self.class_id(class)?;
        Ok(self
            .ctx(class)
            .registry
            .groups()
            .map(|(_, g)| (g.key.clone(), Self::refs(class, &g.members)))
            .collect())
    }

    pub fn instance_count(&self, class: &str) -> Result<usize> {
        let class = self.class_id(class)?;
        Ok(self.ctx(class).registry.len())
    }

    pub fn collection(&self, items: Vec<InstanceRef>) -> InstanceCollection<'_> {
        InstanceCollection::new(self, items)
    }

    // ---- lifecycle ----

    fn allocate(
        &mut self,
        class: ClassId,
        columns: Columns,
        key: Option<KeyValue>,
        copy_of: Option<u32>,
    ) -> InstanceRef {
        let track = self.track_revisions;
        let ctx = self.ctx_mut(class);
        let slot = ctx.instances.len() as u32;
        ctx.instances.push(Some(Instance::new(columns, track)));
        let joined = copy_of.and_then(|source| ctx.registry.register_copy(slot, source));
        if joined.is_none() {
            ctx.registry.register(slot, key);
        }
        InstanceRef { class, slot }
    }

    fn default_columns(def: &ModelDef) -> Columns {
        let mut columns: Columns = def
            .columns
            .iter()
            .map(|c| (c.name.clone(), Value::Null))
            .collect();
        columns.insert(def.primary_key_column().to_string(), Value::Null);
        columns
    }

    /// Check the primary- and foreign-key columns of incoming attributes
    fn validate_keys(&self, class: ClassId, columns: &Columns) -> Result<Option<KeyValue>> {
        let def = self.model(class);
        let pk_column = def.primary_key_column();
        let key = match columns.get(pk_column) {
            Some(value) => self.parse_key(class, pk_column, value, def.primary_key)?,
            None => None,
        };
        let table = self.relationships.table(&def.name)?;
        for entry in table.of_kind(RelationshipKind::BelongsTo) {
            let Some(fk) = entry.foreign_key.as_deref() else {
                continue;
            };
            if let Some(value) = columns.get(fk) {
                let kind = self.relationships.model(&entry.target)?.primary_key;
                self.parse_key(class, fk, value, kind)?;
            }
        }
        Ok(key)
    }

    /// Construct a new instance. A key in `attrs` joins that key's Known
    /// Instance Set; otherwise the instance starts its own Unknown Group.
    pub fn build(&mut self, class: &str, attrs: Attributes) -> Result<InstanceRef> {
        let class_id = self.class_id(class)?;
        let key = self.validate_keys(class_id, &attrs.columns)?;
        for (name, value) in &attrs.relationships {
            self.check_relationship_value(class_id, name, value)?;
        }
        let mut columns = Self::default_columns(self.model(class_id));
        columns.extend(attrs.columns);

        let r = self.allocate(class_id, columns, key.clone(), None);
        debug!("built {} {} (key: {:?})", class, r, key);

        if let Err(err) = self.apply_relationships(r, attrs.relationships) {
            self.unload(r)?;
            return Err(err);
        }
        Ok(r)
    }

    pub(crate) fn apply_relationships(
        &mut self,
        r: InstanceRef,
        relationships: Vec<(String, RelationValue)>,
    ) -> Result<()> {
        for (name, value) in relationships {
            self.set_relationship(r, &name, value)?;
        }
        Ok(())
    }

    /// Copy-construct from `source`; the copy joins the source's group but
    /// starts with an empty relationship cache.
    pub fn copy(&mut self, source: InstanceRef) -> Result<InstanceRef> {
        let columns = self.instance(source)?.columns.clone();
        let key = self.key_of(source);
        Ok(self.allocate(source.class, columns, key, Some(source.slot)))
    }

    /// Build the record `insert` hands to the adapter
    pub(crate) fn record_for_insert(&self, class: &str, attrs: &Attributes) -> Result<Columns> {
        let class_id = self.class_id(class)?;
        let key = self.validate_keys(class_id, &attrs.columns)?;
        if let Some(key) = key {
            if self.canonical(class_id, &key).is_some() {
                return Err(ModelError::IdentityConflict {
                    class: class.to_string(),
                    key,
                });
            }
        }

        let mut record = attrs.columns.clone();
        for (name, value) in &attrs.relationships {
            let entry = self.check_relationship_value(class_id, name, value)?;
            if let (RelationshipKind::BelongsTo, RelationValue::One(target), Some(fk)) =
                (entry.kind, value, entry.foreign_key.as_deref())
            {
                let key = target.and_then(|t| self.key_of(t));
                record.insert(fk.to_string(), key_to_value(key.as_ref()));
            }
        }
        Ok(record)
    }

    /// Canonical cached instance for `key`, if the record is persisted
    pub fn canonical(&self, class: ClassId, key: &KeyValue) -> Option<InstanceRef> {
        self.ctx(class)
            .persisted
            .get(key)
            .map(|slot| InstanceRef { class, slot: *slot })
    }

    pub fn is_canonical(&self, r: InstanceRef) -> bool {
        self.key_of(r)
            .and_then(|key| self.canonical(r.class, &key))
            .map_or(false, |canonical| canonical == r)
    }

    /// Designate a persisted record's canonical instance, refreshing its
    /// columns when one is already cached.
    pub fn cache_record(&mut self, class: &str, record: Columns) -> Result<InstanceRef> {
        let class_id = self.class_id(class)?;
        let def = self.model(class_id);
        let pk_column = def.primary_key_column();
        let key = self
            .parse_key(
                class_id,
                pk_column,
                record.get(pk_column).unwrap_or(&Value::Null),
                def.primary_key,
            )?
            .ok_or_else(|| ModelError::InvalidKey {
                class: class.to_string(),
                column: pk_column.to_string(),
                value: Value::Null,
            })?;

        if let Some(existing) = self.canonical(class_id, &key) {
            let instance = self.instance_mut(existing)?;
            instance.columns.extend(record);
            return Ok(existing);
        }

        let mut columns = Self::default_columns(self.model(class_id));
        columns.extend(record);
        let r = self.allocate(class_id, columns, Some(key.clone()), None);
        self.ctx_mut(class_id).persisted.insert(key.clone(), r.slot);
        debug!("cached {} {} as {}", class, key, r);
        Ok(r)
    }

    /// A fresh copy of the canonical instance for `key`
    pub fn peek(&mut self, class: &str, key: &KeyValue) -> Result<Option<InstanceRef>> {
        let class_id = self.class_id(class)?;
        self.canonical(class_id, key)
            .map(|canonical| self.copy(canonical))
            .transpose()
    }

    /// Drop one instance: its registry membership, its cache entries and
    /// every cached pointer to it.
    pub fn unload(&mut self, r: InstanceRef) -> Result<()> {
        self.instance(r)?;
        let key = self.key_of(r);
        let ctx = self.ctx_mut(r.class);
        if let Some(key) = key {
            if ctx.persisted.get(&key) == Some(&r.slot) {
                ctx.persisted.remove(&key);
            }
        }
        ctx.instances[r.slot as usize] = None;
        ctx.registry.remove(r.slot);
        ctx.cache.clear(r.slot);
        for ctx in &mut self.classes {
            ctx.cache.evict_target(r);
        }
        debug!("unloaded {}", r);
        Ok(())
    }

    /// Unload the canonical instance of a record. Detached copies stay.
    pub fn unload_record(&mut self, class: &str, key: &KeyValue) -> Result<bool> {
        let class_id = self.class_id(class)?;
        match self.canonical(class_id, key) {
            Some(canonical) => {
                self.unload(canonical)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Forget every instance and derived table. Handles from before the
    /// reset must not be used afterwards.
    pub fn reset(&mut self) {
        for ctx in &mut self.classes {
            ctx.clear();
        }
        self.relationships.reset();
        debug!("session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DataType;
    use serde_json::json;

    fn session() -> Session {
        let schema = Schema::new(
            "test",
            vec![
                ModelDef::new("User", KeyKind::Id).column("name", DataType::String),
                ModelDef::new("Tag", KeyKind::Uuid),
            ],
        );
        Session::new(schema).unwrap()
    }

    #[test]
    fn test_build_fills_declared_columns() {
        let mut s = session();
        let user = s.build("User", Attributes::new()).unwrap();
        assert_eq!(s.get(user, "name").unwrap(), Value::Null);
        assert_eq!(s.primary_key(user).unwrap(), None);
        assert!(!s.is_dirty(user).unwrap());
    }

    #[test]
    fn test_build_rejects_wrong_key_kind() {
        let mut s = session();
        let err = s.build("Tag", Attributes::new().column("uuid", 4)).unwrap_err();
        assert!(matches!(err, ModelError::InvalidKey { .. }));
    }

    #[test]
    fn test_copies_are_distinct_references() {
        let mut s = session();
        let user = s.build("User", Attributes::new().column("name", "a")).unwrap();
        let copy = s.copy(user).unwrap();
        assert_ne!(user, copy);
        assert!(s.same_record(user, copy));
        assert_eq!(s.references_of(user).unwrap(), vec![user, copy]);

        s.set(copy, "name", "b").unwrap();
        assert_eq!(s.get(user, "name").unwrap(), json!("a"));
    }

    #[test]
    fn test_cache_record_and_peek() {
        let mut s = session();
        let record: Columns = [("id".to_string(), json!(3)), ("name".to_string(), json!("x"))]
            .into_iter()
            .collect();
        let canonical = s.cache_record("User", record).unwrap();
        assert!(s.is_canonical(canonical));

        let copy = s.peek("User", &KeyValue::Int(3)).unwrap().unwrap();
        assert!(!s.is_canonical(copy));
        assert!(s.same_record(copy, canonical));
        assert!(s.peek("User", &KeyValue::Int(4)).unwrap().is_none());
    }

    #[test]
    fn test_unload_record_keeps_detached_copies() {
        let mut s = session();
        let record: Columns = [("id".to_string(), json!(1))].into_iter().collect();
        s.cache_record("User", record).unwrap();
        let copy = s.peek("User", &KeyValue::Int(1)).unwrap().unwrap();

        assert!(s.unload_record("User", &KeyValue::Int(1)).unwrap());
        assert!(s.canonical(copy.class, &KeyValue::Int(1)).is_none());
        assert!(s.is_loaded(copy));
        assert_eq!(s.instance_count("User").unwrap(), 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut s = session();
        let user = s.build("User", Attributes::new()).unwrap();
        s.reset();
        assert!(!s.is_loaded(user));
        assert_eq!(s.instance_count("User").unwrap(), 0);
    }

    #[test]
    fn test_record_error() {
        let mut s = session();
        let user = s.build("User", Attributes::new()).unwrap();
        s.record_error(user, "name", "is required").unwrap();
        assert_eq!(s.errors(user).unwrap()["name"], "is required");
    }

    #[test]
    fn test_reset_does_not_reuse_slots() {
        let mut s = session();
        let old = s.build("User", Attributes::new().column("name", "old")).unwrap();
        s.reset();
        let fresh = s.build("User", Attributes::new().column("name", "fresh")).unwrap();

        assert_ne!(old, fresh);
        assert!(matches!(
            s.get(old, "name"),
            Err(ModelError::InstanceUnloaded { .. })
        ));
        assert_eq!(s.get(fresh, "name").unwrap(), json!("fresh"));
    }

    #[test]
    fn test_known_set_lookup_does_not_open_groups() {
        let s = session();
        assert!(s.known_set_for("User", &KeyValue::Int(42)).unwrap().is_empty());
        assert!(s.all_groups_for("User").unwrap().is_empty());
    }
}
