use crate::model::{InstanceRef, RelationValue};
use std::collections::HashMap;

/// Memoized relationship values of one class, keyed by relationship name and
/// owner slot.
///
/// Single-valued relationships (BelongsTo, OneToOne) and list relationships
/// (HasMany, ManyToMany) live in separate tables. An absent entry means "not
/// resolved here yet", never "no relationship". Every write bumps the entry's
/// generation so an in-flight resolution can tell it was overtaken.
#[derive(Debug, Default)]
pub struct RelationshipCache {
    single: HashMap<String, HashMap<u32, Option<InstanceRef>>>,
    many: HashMap<String, HashMap<u32, Vec<InstanceRef>>>,
    generations: HashMap<String, HashMap<u32, u64>>,
}

impl RelationshipCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self, name: &str, slot: u32) {
        *self
            .generations
            .entry(name.to_string())
            .or_default()
            .entry(slot)
            .or_insert(0) += 1;
    }

    pub fn generation(&self, name: &str, slot: u32) -> u64 {
        self.generations
            .get(name)
            .and_then(|slots| slots.get(&slot))
            .copied()
            .unwrap_or(0)
    }

    /// Outer `None` when nothing is cached, `Some(None)` for a cached null
    pub fn single(&self, name: &str, slot: u32) -> Option<Option<InstanceRef>> {
        self.single.get(name).and_then(|slots| slots.get(&slot)).copied()
    }

    pub fn many(&self, name: &str, slot: u32) -> Option<&Vec<InstanceRef>> {
        self.many.get(name).and_then(|slots| slots.get(&slot))
    }

    pub fn get(&self, name: &str, slot: u32) -> Option<RelationValue> {
        if let Some(value) = self.single(name, slot) {
            return Some(RelationValue::One(value));
        }
        self.many(name, slot).cloned().map(RelationValue::Many)
    }

    pub fn set(&mut self, name: &str, slot: u32, value: RelationValue) {
        match value {
            RelationValue::One(target) => {
                self.single
                    .entry(name.to_string())
                    .or_default()
                    .insert(slot, target);
            }
            RelationValue::Many(targets) => {
                self.many
                    .entry(name.to_string())
                    .or_default()
                    .insert(slot, targets);
            }
        }
        self.bump(name, slot);
    }

    /// Drop a stale entry so the next read resolves it again
    pub fn forget(&mut self, name: &str, slot: u32) {
        if let Some(slots) = self.single.get_mut(name) {
            slots.remove(&slot);
        }
        if let Some(slots) = self.many.get_mut(name) {
            slots.remove(&slot);
        }
        self.bump(name, slot);
    }

    /// Append to a list entry, creating it when absent
    pub fn push(&mut self, name: &str, slot: u32, target: InstanceRef) {
        self.many
            .entry(name.to_string())
            .or_default()
            .entry(slot)
            .or_default()
            .push(target);
        self.bump(name, slot);
    }

    /// Remove `target` from a cached list or clear a cached single pointer to it.
    /// Returns whether anything changed.
    pub fn detach(&mut self, name: &str, slot: u32, target: InstanceRef) -> bool {
        let mut changed = false;
        if let Some(entry) = self.single.get_mut(name).and_then(|s| s.get_mut(&slot)) {
            if *entry == Some(target) {
                *entry = None;
                changed = true;
            }
        }
        if let Some(list) = self.many.get_mut(name).and_then(|s| s.get_mut(&slot)) {
            let before = list.len();
            list.retain(|item| *item != target);
            changed |= list.len() != before;
        }
        if changed {
            self.bump(name, slot);
        }
        changed
    }

    /// Swap `from` for `to` wherever the entry refers to `from`
    pub fn replace(&mut self, name: &str, slot: u32, from: InstanceRef, to: InstanceRef) {
        if let Some(entry) = self.single.get_mut(name).and_then(|s| s.get_mut(&slot)) {
            if *entry == Some(from) {
                *entry = Some(to);
            }
        }
        if let Some(list) = self.many.get_mut(name).and_then(|s| s.get_mut(&slot)) {
            if list.contains(&to) {
                list.retain(|item| *item != from);
            } else {
                for item in list.iter_mut().filter(|item| **item == from) {
                    *item = to;
                }
            }
        }
        self.bump(name, slot);
    }

    /// Owner slots whose `name` entry currently refers to `target`
    pub fn owners_of(&self, name: &str, target: InstanceRef) -> Vec<u32> {
        let mut owners: Vec<u32> = self
            .single
            .get(name)
            .into_iter()
            .flat_map(|slots| slots.iter())
            .filter(|(_, value)| **value == Some(target))
            .map(|(slot, _)| *slot)
            .collect();
        owners.extend(
            self.many
                .get(name)
                .into_iter()
                .flat_map(|slots| slots.iter())
                .filter(|(_, list)| list.contains(&target))
                .map(|(slot, _)| *slot),
        );
        owners.sort_unstable();
        owners
    }

    /// Drop every entry owned by `slot`
    pub fn clear(&mut self, slot: u32) {
        for slots in self.single.values_mut() {
            slots.remove(&slot);
        }
        for slots in self.many.values_mut() {
            slots.remove(&slot);
        }
        for slots in self.generations.values_mut() {
            if let Some(generation) = slots.get_mut(&slot) {
                *generation += 1;
            }
        }
    }

    /// Remove every pointer to `target` held by any owner
    pub fn evict_target(&mut self, target: InstanceRef) {
        for slots in self.single.values_mut() {
            for value in slots.values_mut() {
                if *value == Some(target) {
                    *value = None;
                }
            }
        }
        for slots in self.many.values_mut() {
            for list in slots.values_mut() {
                list.retain(|item| *item != target);
            }
        }
    }

    pub fn clear_all(&mut self) {
        self.single.clear();
        self.many.clear();
        self.generations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassId;

    fn target(slot: u32) -> InstanceRef {
        InstanceRef {
            class: ClassId(1),
            slot,
        }
    }

    #[test]
    fn test_absent_differs_from_cached_null() {
        let mut cache = RelationshipCache::new();
        assert_eq!(cache.single("owner", 0), None);

        cache.set("owner", 0, RelationValue::One(None));
        assert_eq!(cache.single("owner", 0), Some(None));

        cache.forget("owner", 0);
        assert_eq!(cache.single("owner", 0), None);
    }

    #[test]
    fn test_generation_bumps_on_every_write() {
        let mut cache = RelationshipCache::new();
        let start = cache.generation("owner", 0);
        cache.set("owner", 0, RelationValue::One(Some(target(1))));
        cache.forget("owner", 0);
        assert_eq!(cache.generation("owner", 0), start + 2);
    }

    #[test]
    fn test_detach_and_owners_of() {
        let mut cache = RelationshipCache::new();
        cache.set("photos", 0, RelationValue::Many(vec![target(1), target(2)]));
        cache.set("photos", 3, RelationValue::Many(vec![target(2)]));

        assert_eq!(cache.owners_of("photos", target(2)), vec![0, 3]);
        assert!(cache.detach("photos", 0, target(2)));
        assert!(!cache.detach("photos", 0, target(2)));
        assert_eq!(cache.many("photos", 0).unwrap(), &vec![target(1)]);
    }

    #[test]
    fn test_replace_does_not_duplicate() {
        let mut cache = RelationshipCache::new();
        cache.set("photos", 0, RelationValue::Many(vec![target(1), target(2)]));
        cache.replace("photos", 0, target(1), target(2));
        assert_eq!(cache.many("photos", 0).unwrap(), &vec![target(2)]);

        cache.set("email", 0, RelationValue::One(Some(target(4))));
        cache.replace("email", 0, target(4), target(5));
        assert_eq!(cache.single("email", 0), Some(Some(target(5))));
    }

    #[test]
    fn test_evict_target_and_clear() {
        let mut cache = RelationshipCache::new();
        cache.set("owner", 0, RelationValue::One(Some(target(7))));
        cache.set("photos", 1, RelationValue::Many(vec![target(7)]));
        cache.evict_target(target(7));
        assert_eq!(cache.single("owner", 0), Some(None));
        assert!(cache.many("photos", 1).unwrap().is_empty());

        cache.clear(0);
        assert_eq!(cache.get("owner", 0), None);
    }
}
