//! Relationship reads that need the adapter.

use crate::database::Database;
use crate::logic::query::{FetchPlan, Lookup};
use crate::model::{Columns, InstanceRef, ModelError, RelationValue, Result};
use log::debug;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of reading a relationship through a `Database`
pub enum Relation {
    /// Answered from memory
    Loaded(RelationValue),
    /// Needs an adapter round trip
    Pending(RelationshipHandle),
}

impl Relation {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Relation::Loaded(_))
    }

    pub async fn resolve(self) -> Result<RelationValue> {
        match self {
            Relation::Loaded(value) => Ok(value),
            Relation::Pending(handle) => handle.value().await,
        }
    }
}

/// Deferred relationship value.
///
/// The first `value` call fetches and memoizes; `reload` drops both the memo
/// and the relationship cache entry and fetches again. A failed fetch leaves
/// the cache empty.
#[derive(Clone)]
pub struct RelationshipHandle {
    db: Database,
    owner: InstanceRef,
    name: String,
    settled: Arc<Mutex<Option<RelationValue>>>,
}

impl RelationshipHandle {
    pub(crate) fn new(db: Database, owner: InstanceRef, name: &str) -> Self {
        Self {
            db,
            owner,
            name: name.to_string(),
            settled: Arc::new(Mutex::new(None)),
        }
    }

    pub fn owner(&self) -> InstanceRef {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn value(&self) -> Result<RelationValue> {
        let mut settled = self.settled.lock().await;
        if let Some(value) = settled.as_ref() {
            return Ok(value.clone());
        }
        let value = self.resolve().await?;
        *settled = Some(value.clone());
        Ok(value)
    }

    pub async fn reload(&self) -> Result<RelationValue> {
        let mut settled = self.settled.lock().await;
        *settled = None;
        self.db
            .session()
            .forget_relationship(self.owner, &self.name)?;
        let value = self.resolve().await?;
        *settled = Some(value.clone());
        Ok(value)
    }

    async fn resolve(&self) -> Result<RelationValue> {
        let (plan, generation, model) = {
            let mut session = self.db.session();
            match session.relationship(self.owner, &self.name)? {
                Lookup::Resolved(value) => return Ok(value),
                Lookup::Unresolved(plan) => {
                    let generation = session.generation(self.owner, &self.name);
                    let model = session.schema().model(plan.class())?.clone();
                    (plan, generation, model)
                }
            }
        };

        debug!("loading {} of {} via {:?}", self.name, self.owner, plan);
        let adapter = self.db.adapter();
        let records: Vec<Columns> = match &plan {
            FetchPlan::Find { key, .. } => adapter.find(&model, key).await?.into_iter().collect(),
            FetchPlan::FindBy { .. } => adapter
                .find_by(&model, &plan.criteria())
                .await?
                .into_iter()
                .collect(),
            FetchPlan::FindAll { .. } => adapter.find_all(&model, &plan.criteria()).await?,
            FetchPlan::NotReversible { class, relationship } => {
                return Err(ModelError::UnsupportedRelationshipDirection {
                    class: class.clone(),
                    relationship: relationship.clone(),
                });
            }
        };

        self.db
            .session()
            .settle(self.owner, &self.name, generation, &plan, records)
    }
}
