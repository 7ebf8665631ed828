//! Schema declaration: ordering, configuration and field tables.

use crate::core::config::EngineConfig;
use crate::core::definition::{ValidatorDefinition, ValidatorRef};
use crate::core::error::{SchemaError, SchemaResult};
use crate::schema::instance::Schema;
use indexmap::IndexMap;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Context in which definitions are declared.
///
/// Stamps each declared definition with an increasing order number and
/// applies the engine configuration to it. Schema fields are sorted by
/// that order.
#[derive(Debug)]
pub struct DeclarationRegistry {
    counter: AtomicU64,
    config: EngineConfig,
}

impl DeclarationRegistry {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            counter: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Turn a definition into a shared prototype.
    pub fn declare(&self, mut def: ValidatorDefinition) -> ValidatorRef {
        def.order = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.config.apply(&mut def);
        Arc::new(def)
    }

    /// Start declaring a schema.
    pub fn schema(&self, name: impl Into<String>) -> SchemaBuilder<'_> {
        SchemaBuilder {
            registry: self,
            name: name.into(),
            fields: Vec::new(),
        }
    }
}

impl Default for DeclarationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects fields of one schema.
pub struct SchemaBuilder<'r> {
    registry: &'r DeclarationRegistry,
    name: String,
    fields: Vec<(String, ValidatorRef)>,
}

impl SchemaBuilder<'_> {
    /// Declare `def` and add it under `name`.
    pub fn field(self, name: impl Into<String>, def: ValidatorDefinition) -> Self {
        let prototype = self.registry.declare(def);
        self.declared(name, prototype)
    }

    /// Add an already declared prototype under `name`. Its earlier
    /// declaration order decides its position.
    pub fn declared(mut self, name: impl Into<String>, prototype: ValidatorRef) -> Self {
        self.fields.push((name.into(), prototype));
        self
    }

    pub fn build(self) -> SchemaResult<SchemaDefinition> {
        let mut fields = self.fields;
        fields.sort_by_key(|(_, def)| def.order);

        let mut table = IndexMap::new();
        for (name, prototype) in fields {
            if table.contains_key(&name) {
                return Err(SchemaError::DuplicateField(name));
            }
            let prototype = if prototype.key.is_none() {
                let mut keyed = (*prototype).clone();
                keyed.key = Some(name.clone());
                Arc::new(keyed)
            } else {
                prototype
            };
            table.insert(name, prototype);
        }
        debug!("Declared schema '{}' with {} field(s)", self.name, table.len());
        Ok(SchemaDefinition {
            name: self.name,
            fields: table,
        })
    }
}

/// Named, ordered set of field prototypes.
#[derive(Debug, Clone)]
pub struct SchemaDefinition {
    name: String,
    fields: IndexMap<String, ValidatorRef>,
}

impl SchemaDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &IndexMap<String, ValidatorRef> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ValidatorRef> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Create an instance with every field bound.
    pub fn instantiate(self: &Arc<Self>) -> SchemaResult<Schema> {
        Schema::new(self.clone())
    }
}
