use crate::model::{Columns, KeyValue, ModelDef};
use anyhow::Result;

/// Persistence collaborator behind a `Database`.
///
/// Works on plain records; the session turns them into cached instances.
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    /// Get a record by primary key
    async fn find(&self, model: &ModelDef, key: &KeyValue) -> Result<Option<Columns>>;
    /// First record whose columns match every criterion
    async fn find_by(&self, model: &ModelDef, criteria: &Columns) -> Result<Option<Columns>>;
    /// All records whose columns match every criterion
    async fn find_all(&self, model: &ModelDef, criteria: &Columns) -> Result<Vec<Columns>>;
    /// Store a new record, assigning its primary key when missing
    async fn insert(&self, model: &ModelDef, record: Columns) -> Result<Columns>;
    /// Replace an existing record
    async fn update(&self, model: &ModelDef, record: Columns) -> Result<Columns>;
    /// Remove a record, returning whether it existed
    async fn delete(&self, model: &ModelDef, key: &KeyValue) -> Result<bool>;
}
