pub mod config;
pub mod database;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

pub use database::Database;

// Export logic types
pub use logic::{
    FetchPlan, InstanceCollection, Lookup, Relation, RelationshipEntry, RelationshipHandle,
    RelationshipSchema, RelationshipTable, Session,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{Adapter, MemoryAdapter};
