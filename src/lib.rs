//! # Formbind - Declarative Field Validation
//!
//! Formbind converts untyped input (strings, nested maps and lists) into
//! typed values, checks them against declared constraints and keeps
//! per-field errors, all behind a small per-instance state machine.
//!
//! ## Features
//!
//! - **Shared prototypes**: fields are declared once as immutable definitions
//! - **Isolated instances**: every schema instance binds its own copies with
//!   their own raw value, value and errors
//! - **Composites**: lists, maps and any-of alternatives nest to any depth, with
//!   errors addressable by path
//! - **Cross-field checks**: `EqualTo` compares with a sibling field
//! - **Hooks**: listeners can rewrite or reject input before and after
//!   conversion
//!
//! ## Quick Start
//!
//! ```rust
//! use formbind::prelude::*;
//!
//! let registry = DeclarationRegistry::new();
//! let signup = registry
//!     .schema("signup")
//!     .field("email", ValidatorDefinition::email())
//!     .field("age", ValidatorDefinition::integer().min_value(18i64))
//!     .build()
//!     .unwrap();
//!
//! let mut form = std::sync::Arc::new(signup).instantiate().unwrap();
//! form.set("email", "ann@example.com").unwrap();
//! form.set("age", "17").unwrap();
//!
//! assert!(!form.is_valid().unwrap());
//! assert_eq!(form.errors()["age"][0].message, "Expecting value greater or equal to 18");
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: values, definitions, errors, messages and configuration
//! - [`validators`]: per-kind conversion and rule checks
//! - [`event`]: listeners, notifications and pipelines
//! - [`binding`]: the binding arena, the processing pipeline and validity
//! - [`schema`]: schema declaration, instances and the schema catalog
//!
//! ## Standalone Validators
//!
//! A definition can be used on its own; failures come back as errors:
//!
//! ```rust
//! use formbind::prelude::*;
//!
//! let mut age = ValidatorDefinition::integer().standalone().unwrap();
//! assert_eq!(age.process("42").unwrap(), Value::Integer(42));
//! assert!(matches!(age.process("abc"), Err(ProcessError::Conversion { .. })));
//! ```

#![warn(clippy::all)]

pub mod binding;
pub mod core;
pub mod event;
pub mod schema;
pub mod validators;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use formbind::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::types::{Decimal, Value, ValueType};

    // Definitions
    pub use crate::core::definition::{
        BooleanLiterals, HashAlgorithm, Kind, KindTag, ValidatorDefinition, ValidatorRef,
    };

    // Configuration
    pub use crate::core::config::EngineConfig;

    // Errors
    pub use crate::core::error::{
        BindError, ChildKey, ErrorKind, ErrorPath, EventError, FieldError, FormbindError,
        FormbindResult, HookError, NodeId, ProcessError, SchemaError, ValidationReport,
    };

    // Rules
    pub use crate::validators::rules::Rule;

    // Events
    pub use crate::event::{
        add_listener, get_listeners, listener, notify, pipeline, Alias, AliasMode, Carry,
        EventArgs, EventTarget, Listener, BIND, POSTVALIDATE, PREVALIDATE, PROCESSED, UNBIND,
    };

    // Binding
    pub use crate::binding::{BindingTree, BoundValidator, MapValue, Owner, OwnerRef, Selector, Standalone};

    // Schemas
    pub use crate::schema::{DeclarationRegistry, Schema, SchemaCatalog, SchemaDefinition};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
