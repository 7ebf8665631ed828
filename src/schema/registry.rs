//! Catalog of named schema definitions.

use crate::core::error::{SchemaError, SchemaResult};
use crate::schema::declaration::SchemaDefinition;
use crate::schema::instance::Schema;
use indexmap::IndexMap;
use std::sync::Arc;

/// Named collection of schema definitions.
///
/// Definitions are shared; every `instantiate` call yields an independent
/// instance.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    schemas: IndexMap<String, Arc<SchemaDefinition>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its own name.
    pub fn register(&mut self, definition: SchemaDefinition) -> SchemaResult<Arc<SchemaDefinition>> {
        let name = definition.name().to_string();
        if self.schemas.contains_key(&name) {
            return Err(SchemaError::AlreadyRegistered(name));
        }
        let definition = Arc::new(definition);
        self.schemas.insert(name, definition.clone());
        Ok(definition)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<SchemaDefinition>> {
        self.schemas.get(name)
    }

    /// Create a fresh instance of a registered schema.
    pub fn instantiate(&self, name: &str) -> SchemaResult<Schema> {
        self.schemas
            .get(name)
            .ok_or_else(|| SchemaError::UnknownSchema(name.to_string()))?
            .instantiate()
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<SchemaDefinition>> {
        self.schemas.shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
