//! Intercepted column writes: primary keys, foreign keys and plain columns.

use crate::logic::relationship_schema::RelationshipEntry;
use crate::logic::session::Session;
use crate::model::{key_to_value, same_value, InstanceRef, KeyValue, ModelError, Result};
use log::debug;
use serde_json::Value;

impl Session {
    /// Assign a column the way model code would.
    ///
    /// The primary-key column goes through the identity rules, BelongsTo
    /// foreign-key columns through relationship cleanup, anything else is a
    /// plain write. Relationship fields are assigned with `set_relationship`.
    pub fn set(&mut self, r: InstanceRef, column: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.instance(r)?;
        let def = self.model(r.class);
        let (pk_column, pk_kind) = (def.primary_key_column(), def.primary_key);

        if column == pk_column {
            let key = self.parse_key(r.class, column, &value, pk_kind)?;
            return self.set_primary_key(r, key);
        }

        let table = self.relationships.table(self.class_name(r.class))?;
        if let Some(entry) = table.by_foreign_key(column) {
            let entry = entry.clone();
            return self.set_foreign_key(r, &entry, value);
        }
        if let Some(entry) = table.get(column) {
            return Err(ModelError::RelationshipShape {
                class: self.class_name(r.class).to_string(),
                relationship: entry.name.clone(),
                expected: "assignment through set_relationship",
            });
        }

        self.write_column(r, column, value)?;
        Ok(())
    }

    /// Raw column write with change tracking; drops the column's recorded error.
    /// Returns whether the value changed.
    pub(crate) fn write_column(&mut self, r: InstanceRef, column: &str, value: Value) -> Result<bool> {
        let instance = self.instance_mut(r)?;
        if same_value(instance.column(column), &value) {
            return Ok(false);
        }
        instance.write(column, value);
        instance.errors.remove(column);
        Ok(true)
    }

    /// Change the identity of `r` and of every copy that shares it.
    ///
    /// Fails with `IdentityConflict` when another record is already persisted
    /// under `key`, and with `PersistedKeyImmutable` when `r` is itself the
    /// canonical instance. When the group holds the canonical instance only
    /// `r` leaves it; otherwise the whole group moves.
    pub fn set_primary_key(&mut self, r: InstanceRef, key: Option<KeyValue>) -> Result<()> {
        let current = self.primary_key(r)?;
        if current == key {
            return Ok(());
        }

        let class = self.class_name(r.class).to_string();
        let def = self.model(r.class);
        let pk_column = def.primary_key_column();
        if let Some(new_key) = &key {
            if new_key.kind() != def.primary_key {
                return Err(ModelError::InvalidKey {
                    class,
                    column: pk_column.to_string(),
                    value: new_key.to_value(),
                });
            }
        }

        if let Some(current) = &current {
            if self.is_canonical(r) {
                return Err(ModelError::PersistedKeyImmutable {
                    class,
                    key: current.clone(),
                });
            }
        }
        if let Some(new_key) = &key {
            if let Some(canonical) = self.canonical(r.class, new_key) {
                if !self.same_record(canonical, r) {
                    return Err(ModelError::IdentityConflict {
                        class,
                        key: new_key.clone(),
                    });
                }
            }
        }

        let holds_canonical = current
            .as_ref()
            .map_or(false, |k| self.ctx(r.class).persisted.contains_key(k));
        let ctx = self.ctx_mut(r.class);
        let moved = match ctx.registry.group_of(r.slot) {
            Some(group) if !holds_canonical => ctx.registry.rekey(group, key.clone()).1,
            _ => {
                ctx.registry.move_to_known(r.slot, key.clone());
                vec![r.slot]
            }
        };

        let value = key_to_value(key.as_ref());
        let moved: Vec<InstanceRef> = moved
            .into_iter()
            .map(|slot| InstanceRef { class: r.class, slot })
            .collect();
        for sibling in &moved {
            self.write_column(*sibling, pk_column, value.clone())?;
        }
        debug!(
            "{} {} re-keyed {:?} -> {:?} ({} instances)",
            class,
            r,
            current,
            key,
            moved.len()
        );

        self.propagate_key_to_referrers(&class, &moved, &value)
    }

    /// Rewrite the foreign key of every instance whose cached BelongsTo
    /// points at one of `targets`
    fn propagate_key_to_referrers(
        &mut self,
        class: &str,
        targets: &[InstanceRef],
        value: &Value,
    ) -> Result<()> {
        for (owner_class, entry) in self.relationships.incoming_belongs_to(class)? {
            let Some(fk) = entry.foreign_key.as_deref() else {
                continue;
            };
            let owner_class = self.class_id(&owner_class)?;
            for target in targets {
                let owners = self.ctx(owner_class).cache.owners_of(&entry.name, *target);
                for slot in owners {
                    let referrer = InstanceRef {
                        class: owner_class,
                        slot,
                    };
                    self.write_column(referrer, fk, value.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Write a BelongsTo foreign key and forget whatever it invalidates.
    ///
    /// Only `r` is affected; copies of the same record keep their own state.
    pub(crate) fn set_foreign_key(
        &mut self,
        r: InstanceRef,
        entry: &RelationshipEntry,
        value: Value,
    ) -> Result<()> {
        let Some(fk) = entry.foreign_key.as_deref() else {
            return Ok(());
        };
        let target_kind = self.relationships.model(&entry.target)?.primary_key;
        let key = self.parse_key(r.class, fk, &value, target_kind)?;
        if !self.write_column(r, fk, key_to_value(key.as_ref()))? {
            return Ok(());
        }

        let cached = self.ctx(r.class).cache.single(&entry.name, r.slot);
        let stale = match cached {
            None => true,
            Some(Some(target)) => self.key_of(target) != key,
            Some(None) => key.is_some(),
        };
        if stale {
            if !matches!(cached, Some(None)) {
                self.detach_reverse_pointers(r, entry)?;
            }
            self.ctx_mut(r.class).cache.forget(&entry.name, r.slot);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::logic::session::Session;
    use crate::model::{Attributes, DataType, KeyKind, KeyValue, ModelDef, ModelError, Schema};
    use serde_json::{json, Value};

    fn session() -> Session {
        Session::new(Schema::new(
            "test",
            vec![
                ModelDef::new("User", KeyKind::Id)
                    .column("name", DataType::String)
                    .has_many("photos", "Photo", "owner"),
                ModelDef::new("Photo", KeyKind::Id)
                    .column("owner_id", DataType::Number)
                    .column("taken_at", DataType::Date)
                    .belongs_to("owner", "User"),
            ],
        ))
        .unwrap()
    }

    #[test]
    fn test_primary_key_propagates_through_unknown_group() {
        let mut s = session();
        let a = s.build("User", Attributes::new()).unwrap();
        let b = s.copy(a).unwrap();

        s.set(a, "id", 5).unwrap();
        assert_eq!(s.primary_key(b).unwrap(), Some(KeyValue::Int(5)));
        let set = s.known_set_for("User", &KeyValue::Int(5)).unwrap();
        assert_eq!(set, vec![a, b]);
        assert!(s.unknown_groups("User").unwrap().is_empty());
    }

    #[test]
    fn test_null_key_moves_group_back_to_unknown() {
        let mut s = session();
        let a = s.build("User", Attributes::new().column("id", 2)).unwrap();
        let b = s.copy(a).unwrap();

        s.set(b, "id", Value::Null).unwrap();
        assert_eq!(s.primary_key(a).unwrap(), None);
        assert_eq!(s.unknown_groups("User").unwrap(), vec![vec![a, b]]);
    }

    #[test]
    fn test_identity_conflict_with_persisted_record() {
        let mut s = session();
        let record = [("id".to_string(), json!(1))].into_iter().collect();
        s.cache_record("User", record).unwrap();

        let stranger = s.build("User", Attributes::new()).unwrap();
        let err = s.set(stranger, "id", 1).unwrap_err();
        assert!(matches!(err, ModelError::IdentityConflict { .. }));
        assert_eq!(s.primary_key(stranger).unwrap(), None);
    }

    #[test]
    fn test_canonical_key_is_immutable() {
        let mut s = session();
        let record = [("id".to_string(), json!(1))].into_iter().collect();
        let canonical = s.cache_record("User", record).unwrap();
        let err = s.set(canonical, "id", 9).unwrap_err();
        assert!(matches!(err, ModelError::PersistedKeyImmutable { .. }));
    }

    #[test]
    fn test_rekeying_copy_of_persisted_record_leaves_canonical() {
        let mut s = session();
        let record = [("id".to_string(), json!(1))].into_iter().collect();
        let canonical = s.cache_record("User", record).unwrap();
        let copy = s.peek("User", &KeyValue::Int(1)).unwrap().unwrap();

        s.set(copy, "id", 2).unwrap();
        assert_eq!(s.primary_key(canonical).unwrap(), Some(KeyValue::Int(1)));
        assert_eq!(s.known_set_for("User", &KeyValue::Int(2)).unwrap(), vec![copy]);
    }

    #[test]
    fn test_plain_column_write_is_tracked() {
        let mut s = session();
        let user = s.build("User", Attributes::new()).unwrap();
        s.set(user, "name", "ada").unwrap();
        s.set(user, "name", "ada").unwrap();

        let changes = s.changes(user).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to, json!("ada"));
        s.clear_changes(user).unwrap();
        assert!(!s.is_dirty(user).unwrap());
    }

    #[test]
    fn test_foreign_key_write_drops_column_error() {
        let mut s = session();
        let photo = s.build("Photo", Attributes::new()).unwrap();
        s.record_error(photo, "owner_id", "must exist").unwrap();
        s.set(photo, "owner_id", 3).unwrap();
        assert!(s.errors(photo).unwrap().is_empty());
        assert_eq!(s.get(photo, "owner_id").unwrap(), json!(3));
    }

    #[test]
    fn test_foreign_key_rejects_wrong_kind() {
        let mut s = session();
        let photo = s.build("Photo", Attributes::new()).unwrap();
        let err = s.set(photo, "owner_id", "abc").unwrap_err();
        assert!(matches!(err, ModelError::InvalidKey { .. }));
    }

    #[test]
    fn test_relationship_name_is_not_a_column() {
        let mut s = session();
        let photo = s.build("Photo", Attributes::new()).unwrap();
        let err = s.set(photo, "owner", 1).unwrap_err();
        assert!(matches!(err, ModelError::RelationshipShape { .. }));
    }
}
