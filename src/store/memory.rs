//! MemoryAdapter - HashMap-backed persistence for tests and the demo binary.

use crate::model::{generate_uuid, same_value, Columns, KeyKind, KeyValue, ModelDef};
use crate::store::traits::Adapter;
use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type Table = BTreeMap<KeyValue, Columns>;

/// In-memory tables keyed by class name. Clone-friendly via Arc.
#[derive(Clone)]
pub struct MemoryAdapter {
    tables: Arc<RwLock<HashMap<String, Table>>>,
    first_id: i64,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::with_first_id(1)
    }

    /// Start numeric key generation at `first_id`
    pub fn with_first_id(first_id: i64) -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            first_id,
        }
    }

    pub fn count(&self, class: &str) -> usize {
        self.tables.read().get(class).map(|t| t.len()).unwrap_or(0)
    }

    fn record_key(model: &ModelDef, record: &Columns) -> Option<KeyValue> {
        record
            .get(model.primary_key_column())
            .and_then(KeyValue::from_value)
    }

    fn next_key(&self, model: &ModelDef, table: &Table) -> KeyValue {
        match model.primary_key {
            KeyKind::Id => {
                let max = table
                    .keys()
                    .filter_map(|key| match key {
                        KeyValue::Int(i) => Some(*i),
                        KeyValue::Uuid(_) => None,
                    })
                    .max();
                KeyValue::Int(max.map(|m| m + 1).unwrap_or(self.first_id).max(self.first_id))
            }
            KeyKind::Uuid => generate_uuid(),
        }
    }

    fn matches(record: &Columns, criteria: &Columns) -> bool {
        criteria.iter().all(|(column, expected)| {
            record
                .get(column)
                .map(|actual| same_value(actual, expected))
                .unwrap_or(expected.is_null())
        })
    }
}

#[async_trait::async_trait]
impl Adapter for MemoryAdapter {
    async fn find(&self, model: &ModelDef, key: &KeyValue) -> Result<Option<Columns>> {
        let tables = self.tables.read();
        Ok(tables.get(&model.name).and_then(|t| t.get(key)).cloned())
    }

    async fn find_by(&self, model: &ModelDef, criteria: &Columns) -> Result<Option<Columns>> {
        let tables = self.tables.read();
        Ok(tables
            .get(&model.name)
            .and_then(|t| t.values().find(|record| Self::matches(record, criteria)))
            .cloned())
    }

    async fn find_all(&self, model: &ModelDef, criteria: &Columns) -> Result<Vec<Columns>> {
        let tables = self.tables.read();
        Ok(tables
            .get(&model.name)
            .map(|t| {
                t.values()
                    .filter(|record| Self::matches(record, criteria))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, model: &ModelDef, mut record: Columns) -> Result<Columns> {
        let mut tables = self.tables.write();
        let table = tables.entry(model.name.clone()).or_default();

        let key = match Self::record_key(model, &record) {
            Some(key) => key,
            None => {
                let key = self.next_key(model, table);
                record.insert(model.primary_key_column().to_string(), key.to_value());
                key
            }
        };
        if key.kind() != model.primary_key {
            return Err(anyhow!("{} key {} has the wrong kind", model.name, key));
        }
        if table.contains_key(&key) {
            return Err(anyhow!("{} {} already exists", model.name, key));
        }

        table.insert(key, record.clone());
        Ok(record)
    }

    async fn update(&self, model: &ModelDef, record: Columns) -> Result<Columns> {
        let key = Self::record_key(model, &record)
            .ok_or_else(|| anyhow!("{} update without a primary key", model.name))?;

        let mut tables = self.tables.write();
        let stored = tables
            .get_mut(&model.name)
            .and_then(|t| t.get_mut(&key))
            .ok_or_else(|| anyhow!("{} {} not found", model.name, key))?;
        stored.extend(record);
        Ok(stored.clone())
    }

    async fn delete(&self, model: &ModelDef, key: &KeyValue) -> Result<bool> {
        let mut tables = self.tables.write();
        Ok(tables
            .get_mut(&model.name)
            .map(|t| t.remove(key).is_some())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DataType;
    use serde_json::json;

    fn user() -> ModelDef {
        ModelDef::new("User", KeyKind::Id).column("name", DataType::String)
    }

    fn record(pairs: &[(&str, serde_json::Value)]) -> Columns {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let adapter = MemoryAdapter::new();
        let a = adapter.insert(&user(), record(&[("name", json!("a"))])).await.unwrap();
        let b = adapter.insert(&user(), record(&[("name", json!("b"))])).await.unwrap();
        assert_eq!(a["id"], json!(1));
        assert_eq!(b["id"], json!(2));
        assert_eq!(adapter.count("User"), 2);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_key() {
        let adapter = MemoryAdapter::new();
        adapter.insert(&user(), record(&[("id", json!(4))])).await.unwrap();
        let err = adapter.insert(&user(), record(&[("id", json!(4))])).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_uuid_keys_are_generated() {
        let adapter = MemoryAdapter::new();
        let group = ModelDef::new("Group", KeyKind::Uuid);
        let saved = adapter.insert(&group, Columns::new()).await.unwrap();
        assert!(saved["uuid"].is_string());
    }

    #[tokio::test]
    async fn test_find_all_filters_by_criteria() {
        let adapter = MemoryAdapter::new();
        let photo = ModelDef::new("Photo", KeyKind::Id).column("owner_id", DataType::Number);
        adapter.insert(&photo, record(&[("owner_id", json!(1))])).await.unwrap();
        adapter.insert(&photo, record(&[("owner_id", json!(2))])).await.unwrap();
        adapter.insert(&photo, record(&[("owner_id", json!(1))])).await.unwrap();

        let owned = adapter
            .find_all(&photo, &record(&[("owner_id", json!(1))]))
            .await
            .unwrap();
        assert_eq!(owned.len(), 2);

        let first = adapter
            .find_by(&photo, &record(&[("owner_id", json!(2))]))
            .await
            .unwrap();
        assert_eq!(first.unwrap()["id"], json!(2));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let adapter = MemoryAdapter::new();
        adapter.insert(&user(), record(&[("name", json!("a"))])).await.unwrap();
        let updated = adapter
            .update(&user(), record(&[("id", json!(1)), ("name", json!("b"))]))
            .await
            .unwrap();
        assert_eq!(updated["name"], json!("b"));

        assert!(adapter.delete(&user(), &KeyValue::Int(1)).await.unwrap());
        assert!(adapter.find(&user(), &KeyValue::Int(1)).await.unwrap().is_none());
    }
}
