use crate::model::KeyValue;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u64);

/// Live copies of one logical record.
///
/// A group with a key is a Known Instance Set, a group without one is an
/// Unknown Group. Members are kept in insertion order; the last member is the
/// most recent one.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceGroup {
    pub key: Option<KeyValue>,
    pub members: Vec<u32>,
}

/// Per-class registry of every live instance slot, grouped by identity
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    groups: BTreeMap<GroupId, InstanceGroup>,
    known: HashMap<KeyValue, GroupId>,
    membership: HashMap<u32, GroupId>,
    next_group: u64,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_group(&mut self, key: Option<KeyValue>) -> GroupId {
        let id = GroupId(self.next_group);
        self.next_group += 1;
        if let Some(key) = &key {
            self.known.insert(key.clone(), id);
        }
        self.groups.insert(
            id,
            InstanceGroup {
                key,
                members: Vec::new(),
            },
        );
        id
    }

    /// Register a freshly constructed instance under its key, or in a new Unknown Group
    pub fn register(&mut self, slot: u32, key: Option<KeyValue>) -> GroupId {
        let group = match key {
            Some(key) => self.known_set_for(&key),
            None => self.open_group(None),
        };
        self.join(slot, group);
        group
    }

    /// Add `slot` to the same group as `source` (copy construction)
    pub fn register_copy(&mut self, slot: u32, source: u32) -> Option<GroupId> {
        let group = *self.membership.get(&source)?;
        self.join(slot, group);
        Some(group)
    }

    fn join(&mut self, slot: u32, group: GroupId) {
        if let Some(g) = self.groups.get_mut(&group) {
            g.members.push(slot);
            self.membership.insert(slot, group);
        }
    }

    /// Take `slot` out of its group, discarding the group once it is empty
    fn leave(&mut self, slot: u32) -> Option<GroupId> {
        let group = self.membership.remove(&slot)?;
        let emptied = match self.groups.get_mut(&group) {
            Some(g) => {
                g.members.retain(|member| *member != slot);
                g.members.is_empty()
            }
            None => false,
        };
        if emptied {
            self.discard(group);
        }
        Some(group)
    }

    fn discard(&mut self, group: GroupId) {
        if let Some(g) = self.groups.remove(&group) {
            if let Some(key) = g.key {
                if self.known.get(&key) == Some(&group) {
                    self.known.remove(&key);
                }
            }
        }
    }

    pub fn group_of(&self, slot: u32) -> Option<GroupId> {
        self.membership.get(&slot).copied()
    }

    pub fn group(&self, group: GroupId) -> Option<&InstanceGroup> {
        self.groups.get(&group)
    }

    /// The Known Instance Set or Unknown Group containing `slot`
    pub fn references_of(&self, slot: u32) -> Option<&InstanceGroup> {
        self.group_of(slot).and_then(|g| self.groups.get(&g))
    }

    /// Existing Known Instance Set for `key`, without creating one
    pub fn known_group(&self, key: &KeyValue) -> Option<GroupId> {
        self.known.get(key).copied()
    }

    /// Known Instance Set for `key`, created empty on first access
    pub fn known_set_for(&mut self, key: &KeyValue) -> GroupId {
        match self.known.get(key) {
            Some(group) => *group,
            None => self.open_group(Some(key.clone())),
        }
    }

    /// Move a single instance into the set for `key` (or a new Unknown Group)
    pub fn move_to_known(&mut self, slot: u32, key: Option<KeyValue>) -> GroupId {
        self.leave(slot);
        self.register(slot, key)
    }

    /// Move every member of `group` under `key`, merging into an existing
    /// Known Instance Set when there is one. Returns the destination group
    /// and the slots that moved.
    pub fn rekey(&mut self, group: GroupId, key: Option<KeyValue>) -> (GroupId, Vec<u32>) {
        let Some(source) = self.groups.get(&group) else {
            return (group, Vec::new());
        };
        let moved = source.members.clone();
        self.discard(group);

        let destination = match &key {
            Some(key) => self.known_set_for(key),
            None => self.open_group(None),
        };
        for slot in &moved {
            self.membership.remove(slot);
            self.join(*slot, destination);
        }
        (destination, moved)
    }

    /// Forget an instance completely (unload)
    pub fn remove(&mut self, slot: u32) {
        self.leave(slot);
    }

    /// Every Known Instance Set and Unknown Group of the class
    pub fn groups(&self) -> impl Iterator<Item = (GroupId, &InstanceGroup)> {
        self.groups.iter().map(|(id, g)| (*id, g))
    }

    pub fn unknown_groups(&self) -> impl Iterator<Item = &InstanceGroup> {
        self.groups.values().filter(|g| g.key.is_none())
    }

    pub fn len(&self) -> usize {
        self.membership.len()
    }

    pub fn is_empty(&self) -> bool {
        self.membership.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.known.clear();
        self.membership.clear();
    }
}
