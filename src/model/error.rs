use crate::model::KeyValue;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Unknown model class '{0}'")]
    UnknownClass(String),
    #[error("Relationship '{relationship}' not found on {class}")]
    UnknownRelationship { class: String, relationship: String },
    #[error("{class} with primary key {key} already exists")]
    IdentityConflict { class: String, key: KeyValue },
    #[error("{class} {key} is cached; its primary key cannot be changed in place")]
    PersistedKeyImmutable { class: String, key: KeyValue },
    #[error("Invalid key for {class}.{column}: {value}")]
    InvalidKey {
        class: String,
        column: String,
        value: serde_json::Value,
    },
    #[error("{class} instance #{slot} has been unloaded")]
    InstanceUnloaded { class: String, slot: u32 },
    #[error("{class}.{relationship} expects {expected}")]
    RelationshipShape {
        class: String,
        relationship: String,
        expected: &'static str,
    },
    #[error("{class}.{relationship} expects a {expected} instance, got {actual}")]
    WrongTargetClass {
        class: String,
        relationship: String,
        expected: String,
        actual: String,
    },
    #[error("{class}.{relationship} is not reversible")]
    UnsupportedRelationshipDirection { class: String, relationship: String },
    #[error("{class} {key} not found")]
    NotFound { class: String, key: KeyValue },
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    #[error("Adapter error: {0}")]
    Adapter(String),
}

impl From<anyhow::Error> for ModelError {
    fn from(err: anyhow::Error) -> Self {
        ModelError::Adapter(err.to_string())
    }
}
