//! Relationship reads: the memoized cache first, then already-constructed
//! instances, and only then a fetch plan for the adapter.

use crate::logic::relationship_schema::RelationshipEntry;
use crate::logic::session::Session;
use crate::model::{
    Columns, InstanceRef, KeyValue, ModelError, RelationValue, RelationshipKind, Result,
};
use log::{debug, trace, warn};

/// Adapter call that would satisfy a relationship read
#[derive(Debug, Clone, PartialEq)]
pub enum FetchPlan {
    /// BelongsTo: the target by primary key
    Find { class: String, key: KeyValue },
    /// OneToOne: the first target whose `column` holds `key`
    FindBy {
        class: String,
        column: String,
        key: KeyValue,
    },
    /// HasMany: every target whose `column` holds `key`
    FindAll {
        class: String,
        column: String,
        key: KeyValue,
    },
    /// ManyToMany reads have no reverse lookup
    NotReversible { class: String, relationship: String },
}

impl FetchPlan {
    pub fn class(&self) -> &str {
        match self {
            FetchPlan::Find { class, .. }
            | FetchPlan::FindBy { class, .. }
            | FetchPlan::FindAll { class, .. }
            | FetchPlan::NotReversible { class, .. } => class,
        }
    }

    /// Equality criteria for `find_by`/`find_all`
    pub fn criteria(&self) -> Columns {
        match self {
            FetchPlan::FindBy { column, key, .. } | FetchPlan::FindAll { column, key, .. } => {
                [(column.clone(), key.to_value())].into_iter().collect()
            }
            FetchPlan::Find { .. } | FetchPlan::NotReversible { .. } => Columns::new(),
        }
    }
}

/// Outcome of reading a relationship without I/O
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Resolved(RelationValue),
    Unresolved(FetchPlan),
}

impl Session {
    /// Read a relationship field.
    ///
    /// Returns the cached value when it is still consistent with the foreign
    /// key, otherwise tries the canonical cache and the in-memory resolver.
    /// `Unresolved` carries the adapter call the caller still has to make.
    pub fn relationship(&mut self, owner: InstanceRef, name: &str) -> Result<Lookup> {
        self.instance(owner)?;
        let entry = self.entry(owner.class, name)?;
        match entry.kind {
            RelationshipKind::BelongsTo => self.lookup_belongs_to(owner, &entry),
            RelationshipKind::OneToOne => self.lookup_one_to_one(owner, &entry),
            RelationshipKind::HasMany | RelationshipKind::ManyToMany => {
                self.lookup_many(owner, &entry)
            }
        }
    }

    /// Cached value of a relationship, `None` when nothing is cached
    pub fn cached_relationship(&self, owner: InstanceRef, name: &str) -> Result<Option<RelationValue>> {
        self.instance(owner)?;
        let entry = self.entry(owner.class, name)?;
        Ok(self.ctx(owner.class).cache.get(&entry.name, owner.slot))
    }

    /// Drop the cached value so the next read resolves it again
    pub fn forget_relationship(&mut self, owner: InstanceRef, name: &str) -> Result<()> {
        self.instance(owner)?;
        let entry = self.entry(owner.class, name)?;
        self.ctx_mut(owner.class).cache.forget(&entry.name, owner.slot);
        Ok(())
    }

    /// Generation of a relationship entry; any write to it changes the value
    pub fn generation(&self, owner: InstanceRef, name: &str) -> u64 {
        self.ctx(owner.class).cache.generation(name, owner.slot)
    }

    fn remember(&mut self, owner: InstanceRef, name: &str, value: RelationValue) -> Lookup {
        self.ctx_mut(owner.class)
            .cache
            .set(name, owner.slot, value.clone());
        Lookup::Resolved(value)
    }

    fn lookup_belongs_to(&mut self, owner: InstanceRef, entry: &RelationshipEntry) -> Result<Lookup> {
        let fk = match entry.foreign_key.as_deref() {
            Some(column) => self.instance(owner)?.key(column),
            None => None,
        };

        match self.ctx(owner.class).cache.single(&entry.name, owner.slot) {
            Some(Some(target)) if self.key_of(target) == fk => {
                return Ok(Lookup::Resolved(RelationValue::One(Some(target))));
            }
            Some(None) if fk.is_none() => {
                return Ok(Lookup::Resolved(RelationValue::One(None)));
            }
            Some(_) => {
                debug!("{}.{} on {} is stale", self.class_name(owner.class), entry.name, owner);
                self.ctx_mut(owner.class).cache.forget(&entry.name, owner.slot);
            }
            None => {}
        }

        let target_class = self.class_id(&entry.target)?;
        if let Some(key) = &fk {
            if let Some(canonical) = self.canonical(target_class, key) {
                let copy = self.copy(canonical)?;
                return Ok(self.remember(owner, &entry.name, RelationValue::One(Some(copy))));
            }
        }

        if let Some(found) = self.query_belongs_to(owner, entry, &fk)? {
            return Ok(self.remember(owner, &entry.name, RelationValue::One(Some(found))));
        }
        match fk {
            None => Ok(self.remember(owner, &entry.name, RelationValue::One(None))),
            Some(key) => Ok(Lookup::Unresolved(FetchPlan::Find {
                class: entry.target.clone(),
                key,
            })),
        }
    }

    /// In-memory BelongsTo resolution.
    ///
    /// Scans the Known Instance Set for the foreign key newest first: a member
    /// whose reverse cache already holds `owner` wins, else the newest member
    /// with nothing cached on the reverse side. Failing that, adopt a value
    /// another copy of `owner` resolved, if it agrees with the foreign key.
    fn query_belongs_to(
        &self,
        owner: InstanceRef,
        entry: &RelationshipEntry,
        fk: &Option<KeyValue>,
    ) -> Result<Option<InstanceRef>> {
        let target_class = self.class_id(&entry.target)?;
        if let Some(key) = fk {
            let ctx = self.ctx(target_class);
            let members: Vec<InstanceRef> = ctx
                .registry
                .known_group(key)
                .and_then(|group| ctx.registry.group(group))
                .map(|group| {
                    group
                        .members
                        .iter()
                        .rev()
                        .map(|slot| InstanceRef {
                            class: target_class,
                            slot: *slot,
                        })
                        .collect()
                })
                .unwrap_or_default();
            trace!(
                "{}.{} on {}: {} candidates for key {}",
                self.class_name(owner.class),
                entry.name,
                owner,
                members.len(),
                key
            );

            let reverse_value = |member: InstanceRef| {
                entry
                    .reverse
                    .as_deref()
                    .and_then(|reverse| ctx.cache.get(reverse, member.slot))
            };
            if let Some(exact) = members
                .iter()
                .copied()
                .find(|m| reverse_value(*m).map_or(false, |v| v.contains(owner)))
            {
                return Ok(Some(exact));
            }
            if let Some(fallback) = members.iter().copied().find(|m| reverse_value(*m).is_none()) {
                return Ok(Some(fallback));
            }
        }

        let cache = &self.ctx(owner.class).cache;
        Ok(self
            .group_members(owner)
            .into_iter()
            .rev()
            .filter(|sibling| *sibling != owner)
            .find_map(|sibling| match cache.single(&entry.name, sibling.slot) {
                Some(Some(value)) if self.is_loaded(value) && self.key_of(value) == *fk => {
                    Some(value)
                }
                _ => None,
            }))
    }

    fn lookup_one_to_one(&mut self, owner: InstanceRef, entry: &RelationshipEntry) -> Result<Lookup> {
        if let Some(value) = self.ctx(owner.class).cache.single(&entry.name, owner.slot) {
            return Ok(Lookup::Resolved(RelationValue::One(value)));
        }
        if let Some(found) = self.query_one_to_one(owner, entry)? {
            return Ok(self.remember(owner, &entry.name, RelationValue::One(Some(found))));
        }

        let (Some(key), Some(fk)) = (self.key_of(owner), entry.foreign_key.clone()) else {
            return Ok(self.remember(owner, &entry.name, RelationValue::One(None)));
        };
        let target_class = self.class_id(&entry.target)?;
        let canonical_referrer = self
            .ctx(target_class)
            .persisted
            .values()
            .copied()
            .filter(|slot| {
                let r = InstanceRef {
                    class: target_class,
                    slot: *slot,
                };
                self.instance(r)
                    .map_or(false, |instance| instance.key(&fk).as_ref() == Some(&key))
            })
            .min();
        if let Some(slot) = canonical_referrer {
            let copy = self.copy(InstanceRef {
                class: target_class,
                slot,
            })?;
            return Ok(self.remember(owner, &entry.name, RelationValue::One(Some(copy))));
        }

        Ok(Lookup::Unresolved(FetchPlan::FindBy {
            class: entry.target.clone(),
            column: fk,
            key,
        }))
    }

    /// In-memory OneToOne resolution: newest target whose reverse cache holds
    /// `owner`, else the newest non-canonical target whose foreign key holds
    /// `owner`'s key with nothing cached, else a copy of `owner` that already
    /// resolved the field.
    fn query_one_to_one(&self, owner: InstanceRef, entry: &RelationshipEntry) -> Result<Option<InstanceRef>> {
        let target_class = self.class_id(&entry.target)?;
        let ctx = self.ctx(target_class);
        let owner_key = self.key_of(owner);
        let reverse = entry.reverse.as_deref();

        let loaded: Vec<InstanceRef> = ctx
            .instances
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, instance)| instance.is_some())
            .map(|(slot, _)| InstanceRef {
                class: target_class,
                slot: slot as u32,
            })
            .collect();
        trace!(
            "{}.{} on {}: scanning {} loaded targets",
            self.class_name(owner.class),
            entry.name,
            owner,
            loaded.len()
        );

        if let Some(reverse) = reverse {
            if let Some(exact) = loaded
                .iter()
                .copied()
                .find(|t| ctx.cache.single(reverse, t.slot) == Some(Some(owner)))
            {
                return Ok(Some(exact));
            }
        }

        if let (Some(key), Some(fk)) = (&owner_key, entry.foreign_key.as_deref()) {
            let fallback = loaded.iter().copied().find(|t| {
                !self.is_canonical(*t)
                    && reverse.map_or(true, |r| ctx.cache.single(r, t.slot).is_none())
                    && self
                        .instance(*t)
                        .map_or(false, |instance| instance.key(fk).as_ref() == Some(key))
            });
            if fallback.is_some() {
                return Ok(fallback);
            }
        }

        let cache = &self.ctx(owner.class).cache;
        Ok(self
            .group_members(owner)
            .into_iter()
            .rev()
            .filter(|sibling| *sibling != owner)
            .find_map(|sibling| match cache.single(&entry.name, sibling.slot) {
                Some(Some(value)) if self.is_loaded(value) => Some(value),
                _ => None,
            }))
    }

    fn lookup_many(&mut self, owner: InstanceRef, entry: &RelationshipEntry) -> Result<Lookup> {
        if let Some(list) = self.ctx(owner.class).cache.many(&entry.name, owner.slot) {
            return Ok(Lookup::Resolved(RelationValue::Many(list.clone())));
        }
        let Some(key) = self.key_of(owner) else {
            return Ok(self.remember(owner, &entry.name, RelationValue::Many(Vec::new())));
        };
        match (entry.kind, entry.foreign_key.clone()) {
            (RelationshipKind::HasMany, Some(column)) => Ok(Lookup::Unresolved(FetchPlan::FindAll {
                class: entry.target.clone(),
                column,
                key,
            })),
            _ => Ok(Lookup::Unresolved(FetchPlan::NotReversible {
                class: self.class_name(owner.class).to_string(),
                relationship: entry.name.clone(),
            })),
        }
    }

    /// Loaded instances whose BelongsTo side already points at `owner`'s
    /// record but that no fetched record stands for, newest copy per record
    fn attached_members(
        &self,
        owner: InstanceRef,
        entry: &RelationshipEntry,
        fetched: &[InstanceRef],
    ) -> Result<Vec<InstanceRef>> {
        let Some(reverse) = entry.reverse.as_deref() else {
            return Ok(Vec::new());
        };
        let class = self.class_id(&entry.target)?;
        let ctx = self.ctx(class);
        let mut attached: Vec<InstanceRef> = Vec::new();
        for (slot, instance) in ctx.instances.iter().enumerate().rev() {
            if instance.is_none() {
                continue;
            }
            let candidate = InstanceRef {
                class,
                slot: slot as u32,
            };
            let Some(Some(holder)) = ctx.cache.single(reverse, candidate.slot) else {
                continue;
            };
            if !self.same_record(holder, owner) || self.is_canonical(candidate) {
                continue;
            }
            if fetched
                .iter()
                .chain(attached.iter())
                .any(|member| self.same_record(*member, candidate))
            {
                continue;
            }
            attached.push(candidate);
        }
        attached.reverse();
        Ok(attached)
    }

    /// Store the records an adapter returned for `owner.name`.
    ///
    /// Records become canonical instances and the relationship receives fresh
    /// copies. When the entry was written after `generation` was taken, the
    /// fetched value is discarded and the current value wins.
    pub fn settle(
        &mut self,
        owner: InstanceRef,
        name: &str,
        generation: u64,
        plan: &FetchPlan,
        records: Vec<Columns>,
    ) -> Result<RelationValue> {
        self.instance(owner)?;
        let entry = self.entry(owner.class, name)?;
        let class = plan.class().to_string();
        let mut targets = Vec::with_capacity(records.len());
        for record in records {
            let canonical = self.cache_record(&class, record)?;
            targets.push(self.copy(canonical)?);
        }

        let value = match plan {
            FetchPlan::FindAll { .. } => {
                let attached = self.attached_members(owner, &entry, &targets)?;
                targets.extend(attached);
                RelationValue::Many(targets)
            }
            FetchPlan::Find { .. } | FetchPlan::FindBy { .. } => {
                RelationValue::One(targets.into_iter().next())
            }
            FetchPlan::NotReversible { class, relationship } => {
                return Err(ModelError::UnsupportedRelationshipDirection {
                    class: class.clone(),
                    relationship: relationship.clone(),
                });
            }
        };

        if self.generation(owner, &entry.name) != generation {
            warn!(
                "{}.{} on {} changed while loading; keeping the newer value",
                self.class_name(owner.class),
                entry.name,
                owner
            );
            let current = self.ctx(owner.class).cache.get(&entry.name, owner.slot);
            return Ok(current.unwrap_or(value));
        }
        self.remember(owner, &entry.name, value.clone());
        Ok(value)
    }
}
