//! Database - a session paired with the adapter that persists it.

use crate::config::ModelConfig;
use crate::logic::deferred::{Relation, RelationshipHandle};
use crate::logic::query::Lookup;
use crate::logic::session::Session;
use crate::model::{
    Attributes, Columns, InstanceRef, KeyValue, ModelDef, ModelError, RelationValue, Result,
    Schema,
};
use crate::store::Adapter;
use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Shared handle to a session and its adapter. Clones share both.
///
/// The session lock is never held across an adapter call.
#[derive(Clone)]
pub struct Database {
    session: Arc<Mutex<Session>>,
    adapter: Arc<dyn Adapter>,
}

impl Database {
    pub fn new(schema: Schema, adapter: impl Adapter + 'static) -> Result<Self> {
        Self::with_config(schema, adapter, &ModelConfig::default())
    }

    pub fn with_config(
        schema: Schema,
        adapter: impl Adapter + 'static,
        config: &ModelConfig,
    ) -> Result<Self> {
        let session = Session::with_config(schema, config)?;
        info!(
            "database ready with {} model classes",
            session.schema().schema().classes.len()
        );
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            adapter: Arc::new(adapter),
        })
    }

    /// Lock the session for synchronous work
    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock()
    }

    pub fn adapter(&self) -> Arc<dyn Adapter> {
        self.adapter.clone()
    }

    fn model(&self, class: &str) -> Result<ModelDef> {
        Ok(self.session().schema().model(class)?.clone())
    }

    pub fn build(&self, class: &str, attrs: Attributes) -> Result<InstanceRef> {
        self.session().build(class, attrs)
    }

    /// A copy of the cached record for `key`, without I/O
    pub fn peek(&self, class: &str, key: &KeyValue) -> Result<Option<InstanceRef>> {
        self.session().peek(class, key)
    }

    pub fn reset(&self) {
        self.session().reset();
    }

    /// Persist a new record and return a fresh copy of it
    pub async fn insert(&self, class: &str, attrs: Attributes) -> Result<InstanceRef> {
        let model = self.model(class)?;
        let record = self.session().record_for_insert(class, &attrs)?;
        let saved = self.adapter.insert(&model, record).await?;

        let mut session = self.session();
        let canonical = session.cache_record(class, saved)?;
        let copy = session.copy(canonical)?;
        if let Err(err) = session.apply_relationships(copy, attrs.relationships) {
            session.unload(copy)?;
            return Err(err);
        }
        session.clear_changes(copy)?;
        debug!("inserted {} {:?}", class, session.primary_key(copy)?);
        Ok(copy)
    }

    /// Write the columns of `r` back to its persisted record
    pub async fn update(&self, r: InstanceRef) -> Result<()> {
        let (class, model, record) = {
            let session = self.session();
            let model = session.model(r.class_id()).clone();
            let key = session.primary_key(r)?.ok_or_else(|| ModelError::InvalidKey {
                class: model.name.clone(),
                column: model.primary_key_column().to_string(),
                value: serde_json::Value::Null,
            })?;
            if session.canonical(r.class_id(), &key).is_none() {
                return Err(ModelError::NotFound {
                    class: model.name.clone(),
                    key,
                });
            }
            (model.name.clone(), model, session.columns(r)?.clone())
        };

        let saved = self.adapter.update(&model, record).await?;
        let mut session = self.session();
        session.cache_record(&class, saved)?;
        session.clear_changes(r)
    }

    /// Delete a persisted record and unload its canonical instance
    pub async fn delete(&self, class: &str, key: &KeyValue) -> Result<()> {
        let model = self.model(class)?;
        if !self.adapter.delete(&model, key).await? {
            return Err(ModelError::NotFound {
                class: class.to_string(),
                key: key.clone(),
            });
        }
        self.session().unload_record(class, key)?;
        Ok(())
    }

    /// A copy of the record for `key`, from the cache when possible
    pub async fn find(&self, class: &str, key: &KeyValue) -> Result<Option<InstanceRef>> {
        if let Some(copy) = self.peek(class, key)? {
            return Ok(Some(copy));
        }
        let model = self.model(class)?;
        let Some(record) = self.adapter.find(&model, key).await? else {
            return Ok(None);
        };
        let mut session = self.session();
        let canonical = session.cache_record(class, record)?;
        session.copy(canonical).map(Some)
    }

    pub async fn find_all(&self, class: &str, criteria: &Columns) -> Result<Vec<InstanceRef>> {
        let model = self.model(class)?;
        let records = self.adapter.find_all(&model, criteria).await?;
        let mut session = self.session();
        records
            .into_iter()
            .map(|record| {
                let canonical = session.cache_record(class, record)?;
                session.copy(canonical)
            })
            .collect()
    }

    /// Read a relationship, deferring to the adapter when memory cannot answer
    pub fn relationship(&self, owner: InstanceRef, name: &str) -> Result<Relation> {
        match self.session().relationship(owner, name)? {
            Lookup::Resolved(value) => Ok(Relation::Loaded(value)),
            Lookup::Unresolved(_) => Ok(Relation::Pending(RelationshipHandle::new(
                self.clone(),
                owner,
                name,
            ))),
        }
    }

    pub async fn load(&self, owner: InstanceRef, name: &str) -> Result<RelationValue> {
        self.relationship(owner, name)?.resolve().await
    }
}
