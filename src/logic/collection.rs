use crate::logic::session::Session;
use crate::model::{same_value, Columns, InstanceRef};
use serde_json::Value;

/// Read-only view over the members of a HasMany or ManyToMany value
pub struct InstanceCollection<'a> {
    session: &'a Session,
    items: Vec<InstanceRef>,
}

impl<'a> InstanceCollection<'a> {
    pub fn new(session: &'a Session, items: Vec<InstanceRef>) -> Self {
        // unloaded members are skipped
        let items = items.into_iter().filter(|r| session.is_loaded(*r)).collect();
        Self { session, items }
    }

    fn value(&self, item: InstanceRef, column: &str) -> Value {
        self.session.get(item, column).unwrap_or(Value::Null)
    }

    /// First member whose `column` equals `value`
    pub fn find_by(&self, column: &str, value: &Value) -> Option<InstanceRef> {
        self.items
            .iter()
            .copied()
            .find(|item| same_value(&self.value(*item, column), value))
    }

    pub fn map_by(&self, column: &str) -> Vec<Value> {
        self.items.iter().map(|item| self.value(*item, column)).collect()
    }

    pub fn is_any(&self, column: &str, value: &Value) -> bool {
        self.find_by(column, value).is_some()
    }

    /// True for an empty collection
    pub fn is_every(&self, column: &str, value: &Value) -> bool {
        self.items
            .iter()
            .all(|item| same_value(&self.value(*item, column), value))
    }

    pub fn objects_at(&self, indexes: &[usize]) -> Vec<Option<InstanceRef>> {
        indexes.iter().map(|i| self.items.get(*i).copied()).collect()
    }

    /// Selected columns of every member
    pub fn get_properties(&self, columns: &[&str]) -> Vec<Columns> {
        self.items
            .iter()
            .map(|item| {
                columns
                    .iter()
                    .map(|column| (column.to_string(), self.value(*item, column)))
                    .collect()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = InstanceRef> + '_ {
        self.items.iter().copied()
    }

    pub fn into_vec(self) -> Vec<InstanceRef> {
        self.items
    }
}
