//! Schemas: declared field sets and their instances.

pub mod declaration;
pub mod instance;
pub mod registry;

pub use declaration::{DeclarationRegistry, SchemaBuilder, SchemaDefinition};
pub use instance::{Schema, BIND_PREFIX};
pub use registry::SchemaCatalog;
