use crate::model::{ModelDef, ModelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub id: String,
    /// Collection of model class declarations
    pub classes: Vec<ModelDef>,
    /// Optional schema description
    #[serde(default)]
    pub description: Option<String>,
}

impl Schema {
    pub fn new(id: &str, classes: Vec<ModelDef>) -> Self {
        Self {
            id: id.to_string(),
            classes,
            description: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let schema: Schema =
            serde_json::from_str(json).map_err(|e| ModelError::InvalidSchema(e.to_string()))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Find a class declaration by name
    pub fn get_class(&self, class_name: &str) -> Option<&ModelDef> {
        self.classes.iter().find(|class| class.name == class_name)
    }

    /// Check that names are unique and every relationship points somewhere real
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for class in &self.classes {
            if !seen.insert(class.name.as_str()) {
                return Err(ModelError::InvalidSchema(format!(
                    "class '{}' is declared twice",
                    class.name
                )));
            }
        }

        for class in &self.classes {
            let mut names = HashSet::new();
            for rel in &class.relationships {
                if !names.insert(rel.name.as_str()) {
                    return Err(ModelError::InvalidSchema(format!(
                        "relationship '{}.{}' is declared twice",
                        class.name, rel.name
                    )));
                }
                let target = self.get_class(&rel.target).ok_or_else(|| {
                    ModelError::InvalidSchema(format!(
                        "relationship '{}.{}' targets undeclared class '{}'",
                        class.name, rel.name, rel.target
                    ))
                })?;
                if let Some(reverse) = &rel.reverse {
                    if target.get_relationship(reverse).is_none() {
                        return Err(ModelError::InvalidSchema(format!(
                            "relationship '{}.{}' names missing reverse '{}.{}'",
                            class.name, rel.name, target.name, reverse
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
