//! Binding of shared definitions to owners.
//!
//! This module contains the per-instance side of the engine:
//! - Owner tables (schema root, map fields, list elements, alternatives)
//! - The binding arena with the processing pipeline and validity checks
//! - The live map proxy
//! - Standalone processing

pub mod owner;
pub mod proxy;
pub mod standalone;
pub mod tree;

pub use owner::{Children, ElementTable, FieldTable, OptionTable, Owner, OwnerRef};
pub use proxy::MapValue;
pub use standalone::Standalone;
pub use tree::{BindingTree, BoundValidator, Selector};
