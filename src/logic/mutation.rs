//! Relationship assignment and the reverse-pointer cleanup it triggers.

use crate::logic::relationship_schema::RelationshipEntry;
use crate::logic::session::Session;
use crate::model::{
    key_to_value, ClassId, InstanceRef, ModelError, RelationValue, RelationshipKind, Result,
};
use itertools::Itertools;
use log::debug;
use serde_json::Value;

impl Session {
    /// Assign a relationship field, e.g. `photo.owner = user`.
    ///
    /// Single-valued kinds take `Option<InstanceRef>`, list kinds take a `Vec`.
    pub fn set_relationship(
        &mut self,
        owner: InstanceRef,
        name: &str,
        value: impl Into<RelationValue>,
    ) -> Result<()> {
        let value = value.into();
        self.instance(owner)?;
        let entry = self.check_relationship_value(owner.class, name, &value)?;

        debug!("{} {}.{} = {:?}", self.class_name(owner.class), owner, name, value);
        match (entry.kind, value) {
            (RelationshipKind::BelongsTo, RelationValue::One(target)) => {
                self.assign_belongs_to(owner, &entry, target)
            }
            (RelationshipKind::OneToOne, RelationValue::One(target)) => {
                self.assign_one_to_one(owner, &entry, target)
            }
            (RelationshipKind::HasMany, RelationValue::Many(targets)) => {
                self.assign_has_many(owner, &entry, targets)
            }
            (RelationshipKind::ManyToMany, RelationValue::Many(targets)) => {
                let targets = targets.into_iter().unique().collect();
                self.ctx_mut(owner.class)
                    .cache
                    .set(&entry.name, owner.slot, RelationValue::Many(targets));
                Ok(())
            }
            (kind, _) => Err(self.shape_error(owner.class, &entry, kind)),
        }
    }

    /// Add one member to a HasMany or ManyToMany list.
    ///
    /// A member already represented by a copy of the same record is not added twice.
    pub fn add_related(&mut self, owner: InstanceRef, name: &str, target: InstanceRef) -> Result<()> {
        self.instance(owner)?;
        let entry = self.entry(owner.class, name)?;
        if entry.kind.is_single() {
            return Err(self.shape_error(owner.class, &entry, entry.kind));
        }
        self.check_target(owner.class, &entry, target)?;
        if self.represented(owner, &entry.name, target) {
            return Ok(());
        }

        if entry.kind == RelationshipKind::HasMany {
            self.claim_member(owner, &entry, target)?;
        }
        if !self.represented(owner, &entry.name, target) && self.appendable(owner, &entry.name) {
            self.ctx_mut(owner.class).cache.push(&entry.name, owner.slot, target);
        }
        Ok(())
    }

    /// Remove a member, and every copy of the same record, from a list relationship
    pub fn remove_related(
        &mut self,
        owner: InstanceRef,
        name: &str,
        target: InstanceRef,
    ) -> Result<()> {
        self.instance(owner)?;
        let entry = self.entry(owner.class, name)?;
        if entry.kind.is_single() {
            return Err(self.shape_error(owner.class, &entry, entry.kind));
        }

        let members: Vec<InstanceRef> = self
            .ctx(owner.class)
            .cache
            .many(&entry.name, owner.slot)
            .map(|list| {
                list.iter()
                    .copied()
                    .filter(|m| self.same_record(*m, target))
                    .collect()
            })
            .unwrap_or_default();
        for member in members {
            self.ctx_mut(owner.class)
                .cache
                .detach(&entry.name, owner.slot, member);
            if entry.kind == RelationshipKind::HasMany {
                self.release_member(owner, &entry, member)?;
            }
        }
        Ok(())
    }

    fn shape_error(&self, class: ClassId, entry: &RelationshipEntry, kind: RelationshipKind) -> ModelError {
        ModelError::RelationshipShape {
            class: self.class_name(class).to_string(),
            relationship: entry.name.clone(),
            expected: if kind.is_single() {
                "a single instance or null"
            } else {
                "a list of instances"
            },
        }
    }

    fn check_target(&self, class: ClassId, entry: &RelationshipEntry, target: InstanceRef) -> Result<()> {
        let actual = self.class_name(target.class);
        if actual != entry.target {
            return Err(ModelError::WrongTargetClass {
                class: self.class_name(class).to_string(),
                relationship: entry.name.clone(),
                expected: entry.target.clone(),
                actual: actual.to_string(),
            });
        }
        self.instance(target)?;
        Ok(())
    }

    /// Validate an assignment to `class.name` before anything is written
    pub(crate) fn check_relationship_value(
        &self,
        class: ClassId,
        name: &str,
        value: &RelationValue,
    ) -> Result<RelationshipEntry> {
        let entry = self.entry(class, name)?;
        let targets: Vec<InstanceRef> = match value {
            RelationValue::One(target) => target.iter().copied().collect(),
            RelationValue::Many(targets) => targets.clone(),
        };
        for target in targets {
            self.check_target(class, &entry, target)?;
        }
        if entry.kind.is_single() != matches!(value, RelationValue::One(_)) {
            return Err(self.shape_error(class, &entry, entry.kind));
        }
        Ok(entry)
    }

    /// A list may grow in place once resolved, or when no persisted record
    /// stands behind the owner. An unresolved list of a persisted record
    /// stays unresolved so a fetch still sees the stored members.
    fn appendable(&self, owner: InstanceRef, name: &str) -> bool {
        self.ctx(owner.class).cache.many(name, owner.slot).is_some()
            || self
                .key_of(owner)
                .and_then(|key| self.canonical(owner.class, &key))
                .is_none()
    }

    /// Whether `target`, or a copy of its record, is in the cached list
    fn represented(&self, owner: InstanceRef, name: &str, target: InstanceRef) -> bool {
        self.ctx(owner.class)
            .cache
            .many(name, owner.slot)
            .map_or(false, |list| list.iter().any(|m| self.same_record(*m, target)))
    }

    pub(crate) fn assign_belongs_to(
        &mut self,
        owner: InstanceRef,
        entry: &RelationshipEntry,
        target: Option<InstanceRef>,
    ) -> Result<()> {
        let existing = self.ctx(owner.class).cache.single(&entry.name, owner.slot);
        if existing == Some(target) {
            return Ok(());
        }

        self.detach_reverse_pointers(owner, entry)?;
        if let Some(target) = target {
            if entry.reverse_kind == Some(RelationshipKind::OneToOne) {
                self.release_claims(owner, &entry.name, target)?;
            }
        }

        self.ctx_mut(owner.class)
            .cache
            .set(&entry.name, owner.slot, RelationValue::One(target));
        if let Some(fk) = entry.foreign_key.as_deref() {
            let key = target.and_then(|t| self.key_of(t));
            self.write_column(owner, fk, key_to_value(key.as_ref()))?;
        }
        if let Some(target) = target {
            self.attach_reverse(owner, entry, target)?;
        }
        Ok(())
    }

    /// Point the reverse side of `entry` at `owner`
    fn attach_reverse(
        &mut self,
        owner: InstanceRef,
        entry: &RelationshipEntry,
        target: InstanceRef,
    ) -> Result<()> {
        let Some(reverse) = entry.reverse.as_deref() else {
            return Ok(());
        };
        match entry.reverse_kind {
            Some(RelationshipKind::HasMany) => {
                let list = self
                    .ctx(target.class)
                    .cache
                    .many(reverse, target.slot)
                    .cloned()
                    .unwrap_or_default();
                if list.contains(&owner) || !self.appendable(target, reverse) {
                    return Ok(());
                }
                let stale_copy = list.iter().copied().find(|m| self.same_record(*m, owner));
                let cache = &mut self.ctx_mut(target.class).cache;
                match stale_copy {
                    Some(copy) => cache.replace(reverse, target.slot, copy, owner),
                    None => cache.push(reverse, target.slot, owner),
                }
            }
            Some(_) => {
                self.ctx_mut(target.class).cache.set(
                    reverse,
                    target.slot,
                    RelationValue::One(Some(owner)),
                );
            }
            None => {}
        }
        Ok(())
    }

    /// Strip reverse-side pointers to `owner` left over from its current
    /// BelongsTo value. A holder that another copy of the owner's record
    /// still legitimately points at is handed to that copy instead.
    pub(crate) fn detach_reverse_pointers(
        &mut self,
        owner: InstanceRef,
        entry: &RelationshipEntry,
    ) -> Result<()> {
        let Some(reverse) = entry.reverse.as_deref() else {
            return Ok(());
        };
        let target_class = self.class_id(&entry.target)?;
        let holders = self.ctx(target_class).cache.owners_of(reverse, owner);
        for slot in holders {
            let holder = InstanceRef {
                class: target_class,
                slot,
            };
            let fresher = self.fresher_claimant(owner, &entry.name, holder);
            let cache = &mut self.ctx_mut(target_class).cache;
            match fresher {
                Some(claimant) => cache.replace(reverse, slot, owner, claimant),
                None => {
                    cache.detach(reverse, slot, owner);
                }
            }
        }
        Ok(())
    }

    /// Most recent other copy of `owner`'s record whose `name` still points at
    /// `holder` (or a copy of it)
    fn fresher_claimant(
        &self,
        owner: InstanceRef,
        name: &str,
        holder: InstanceRef,
    ) -> Option<InstanceRef> {
        let cache = &self.ctx(owner.class).cache;
        self.group_members(owner)
            .into_iter()
            .rev()
            .filter(|sibling| *sibling != owner)
            .find(|sibling| match cache.single(name, sibling.slot) {
                Some(Some(value)) => self.same_record(value, holder),
                _ => false,
            })
    }

    /// Drop other records' claims on `target` through `name`; copies of
    /// `owner`'s own record keep theirs.
    fn release_claims(&mut self, owner: InstanceRef, name: &str, target: InstanceRef) -> Result<()> {
        let entry = self.entry(owner.class, name)?;
        let claimants: Vec<InstanceRef> = self
            .ctx(owner.class)
            .cache
            .owners_of(name, target)
            .into_iter()
            .map(|slot| InstanceRef {
                class: owner.class,
                slot,
            })
            .filter(|other| !self.same_record(*other, owner))
            .collect();
        for other in claimants {
            self.ctx_mut(owner.class)
                .cache
                .set(name, other.slot, RelationValue::One(None));
            if entry.kind == RelationshipKind::BelongsTo {
                if let Some(fk) = entry.foreign_key.as_deref() {
                    self.write_column(other, fk, Value::Null)?;
                }
            }
        }
        Ok(())
    }

    fn assign_one_to_one(
        &mut self,
        owner: InstanceRef,
        entry: &RelationshipEntry,
        target: Option<InstanceRef>,
    ) -> Result<()> {
        let existing = self.ctx(owner.class).cache.single(&entry.name, owner.slot);
        if existing == Some(target) {
            return Ok(());
        }

        let target_class = self.class_id(&entry.target)?;
        let owner_key = self.key_of(owner);
        let reverse = entry.reverse.as_deref();
        let fk = entry.foreign_key.as_deref();

        let mut holders: Vec<InstanceRef> = reverse
            .map(|reverse| self.ctx(target_class).cache.owners_of(reverse, owner))
            .unwrap_or_default()
            .into_iter()
            .map(|slot| InstanceRef {
                class: target_class,
                slot,
            })
            .collect();
        if let (Some(fk), Some(key)) = (fk, &owner_key) {
            let ctx = self.ctx(target_class);
            holders.extend(
                ctx.instances
                    .iter()
                    .enumerate()
                    .filter_map(|(slot, instance)| {
                        let instance = instance.as_ref()?;
                        (instance.key(fk).as_ref() == Some(key)).then_some(InstanceRef {
                            class: target_class,
                            slot: slot as u32,
                        })
                    })
                    .filter(|holder| !self.is_canonical(*holder)),
            );
        }
        let holders: Vec<InstanceRef> = holders
            .into_iter()
            .unique()
            .filter(|holder| Some(*holder) != target)
            .collect();

        for holder in holders {
            if let Some(reverse) = reverse {
                if let Some(claimant) = self.fresher_claimant(owner, &entry.name, holder) {
                    self.ctx_mut(target_class)
                        .cache
                        .replace(reverse, holder.slot, owner, claimant);
                    continue;
                }
                self.ctx_mut(target_class)
                    .cache
                    .detach(reverse, holder.slot, owner);
            }
            if let Some(fk) = fk {
                self.write_column(holder, fk, Value::Null)?;
            }
        }

        if let Some(target) = target {
            self.release_claims(owner, &entry.name, target)?;
        }
        self.ctx_mut(owner.class)
            .cache
            .set(&entry.name, owner.slot, RelationValue::One(target));
        if let Some(target) = target {
            if let Some(fk) = fk {
                self.write_column(target, fk, key_to_value(owner_key.as_ref()))?;
            }
            if let Some(reverse) = reverse {
                self.ctx_mut(target_class).cache.set(
                    reverse,
                    target.slot,
                    RelationValue::One(Some(owner)),
                );
            }
        }
        Ok(())
    }

    fn assign_has_many(
        &mut self,
        owner: InstanceRef,
        entry: &RelationshipEntry,
        targets: Vec<InstanceRef>,
    ) -> Result<()> {
        let mut members: Vec<InstanceRef> = Vec::new();
        for target in targets {
            if !members.iter().any(|m| self.same_record(*m, target)) {
                members.push(target);
            }
        }

        let previous = self
            .ctx(owner.class)
            .cache
            .many(&entry.name, owner.slot)
            .cloned()
            .unwrap_or_default();
        for removed in previous.into_iter().filter(|p| !members.contains(p)) {
            if self.is_loaded(removed) {
                self.release_member(owner, entry, removed)?;
            }
        }

        for member in &members {
            self.claim_member(owner, entry, *member)?;
        }
        self.ctx_mut(owner.class)
            .cache
            .set(&entry.name, owner.slot, RelationValue::Many(members));
        Ok(())
    }

    /// Make `member` belong to `owner` on its side of a HasMany
    fn claim_member(
        &mut self,
        owner: InstanceRef,
        entry: &RelationshipEntry,
        member: InstanceRef,
    ) -> Result<()> {
        if let Some(reverse) = entry.reverse.as_deref() {
            let reverse_entry = self.entry(member.class, reverse)?;
            if reverse_entry.kind == RelationshipKind::BelongsTo {
                return self.assign_belongs_to(member, &reverse_entry, Some(owner));
            }
        }
        if let Some(fk) = entry.foreign_key.as_deref() {
            let key = self.key_of(owner);
            self.write_column(member, fk, key_to_value(key.as_ref()))?;
        }
        Ok(())
    }

    /// Undo `claim_member` for a member leaving the list
    fn release_member(
        &mut self,
        owner: InstanceRef,
        entry: &RelationshipEntry,
        member: InstanceRef,
    ) -> Result<()> {
        if let Some(reverse) = entry.reverse.as_deref() {
            let cache = &mut self.ctx_mut(member.class).cache;
            if cache.single(reverse, member.slot) == Some(Some(owner)) {
                cache.set(reverse, member.slot, RelationValue::One(None));
            }
        }
        if let (Some(fk), Some(key)) = (entry.foreign_key.as_deref(), self.key_of(owner)) {
            if self.instance(member)?.key(fk) == Some(key) {
                self.write_column(member, fk, Value::Null)?;
            }
        }
        Ok(())
    }
}
