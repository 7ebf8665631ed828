//! Core types for the formbind validation engine.
//!
//! This module contains the foundations every other module builds on:
//! - Value types and the `Undefined` sentinel
//! - Validator definitions (prototypes) and their kinds
//! - Error types and validation reports
//! - Message templates
//! - Engine configuration

pub mod config;
pub mod definition;
pub mod error;
pub mod messages;
pub mod types;

// Re-export commonly used types
pub use config::EngineConfig;
pub use definition::{
    humanize, BooleanLiterals, ChoiceSpec, DefaultValue, HashAlgorithm, Kind, KindTag,
    ValidatorDefinition, ValidatorRef,
};
pub use error::{
    BindError, ErrorKind, ErrorPath, FieldError, FormbindError, ProcessError, SchemaError,
    ValidationReport,
};
pub use messages::{format_message, render, render_error};
pub use types::{Decimal, Value, ValueType};
