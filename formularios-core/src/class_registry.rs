use crate::error::{FormError, Result};
use crate::storage;
use opendal::Operator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Classes every deployment knows about.
pub const DEFAULT_CLASSES: &[&str] = &[
    "string", "text", "number", "boolean", "date", "time", "select", "list", "dataset", "group",
    "photo", "location", "signature",
];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClassSchema {
    pub clase: String,
    #[serde(default)]
    pub estructura: Value,
}

impl ClassSchema {
    pub fn new(clase: impl Into<String>) -> Self {
        Self {
            clase: clase.into(),
            estructura: Value::Object(Default::default()),
        }
    }
}

/// Resolves field class names to their structural schema.
pub trait ClassRegistry {
    fn lookup(&self, clase: &str) -> Option<ClassSchema>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryClassRegistry {
    classes: BTreeMap<String, ClassSchema>,
}

impl MemoryClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for name in DEFAULT_CLASSES {
            registry.register(ClassSchema::new(*name));
        }
        registry
    }

    pub fn register(&mut self, schema: ClassSchema) {
        self.classes.insert(schema.clase.clone(), schema);
    }

    pub fn names(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }
}

impl ClassRegistry for MemoryClassRegistry {
    fn lookup(&self, clase: &str) -> Option<ClassSchema> {
        self.classes.get(clase.trim()).cloned()
    }
}

fn class_path(clase: &str) -> String {
    format!("classes/{}.json", clase)
}

fn validate_class_name(clase: &str) -> Result<()> {
    let valid = !clase.is_empty()
        && clase
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(FormError::validation("clase", format!("invalid class name: {clase}")));
    }
    Ok(())
}

pub async fn upsert_class(op: &Operator, schema: &ClassSchema) -> Result<()> {
    validate_class_name(&schema.clase)?;
    storage::write_json(op, &class_path(&schema.clase), schema).await
}

pub async fn list_classes(op: &Operator) -> Result<Vec<ClassSchema>> {
    storage::list_json(op, "classes/").await
}

/// Registry backed by the `classes/` documents in the store.
pub async fn load_class_registry(op: &Operator) -> Result<MemoryClassRegistry> {
    let mut registry = MemoryClassRegistry::new();
    for schema in list_classes(op).await? {
        registry.register(schema);
    }
    Ok(registry)
}
