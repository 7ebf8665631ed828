//! Error types for formbind.
//!
//! Two layers live here:
//! - `FieldError`, the per-field descriptor accumulated by bound validators.
//!   It is serializable so it can be sent to a front end unchanged.
//! - `thiserror` enums for failures of the API itself (binding, standalone
//!   processing, schemas, events, configuration).

use crate::core::types::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier of a bound validator inside a binding tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

// ============================================================================
// Field Errors
// ============================================================================

/// Which pipeline stage produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Raw input could not be converted to the target type.
    Conversion,
    /// Converted value broke a rule, or a hook rejected it.
    Validation,
}

/// Error descriptor stored on a bound validator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub kind: ErrorKind,
    /// Template key, e.g. `value_too_low`.
    pub message_id: String,
    /// Substitution parameters for the template.
    pub params: IndexMap<String, Value>,
    /// Rendered message.
    pub message: String,
}

impl FieldError {
    /// Create an error with no parameters and an unrendered message.
    pub fn new(kind: ErrorKind, message_id: impl Into<String>) -> Self {
        let message_id = message_id.into();
        Self {
            kind,
            message: message_id.clone(),
            message_id,
            params: IndexMap::new(),
        }
    }

    pub fn conversion(message_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conversion, message_id)
    }

    pub fn validation(message_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message_id)
    }

    /// Add a template parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Replace the rendered message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn is_conversion(&self) -> bool {
        self.kind == ErrorKind::Conversion
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Error raised by a hook or a custom rule.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message_id}")]
pub struct HookError {
    pub message_id: String,
    pub params: IndexMap<String, Value>,
}

impl HookError {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            params: IndexMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Key of a child inside its owner: a field name or a list position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChildKey {
    Name(String),
    Index(usize),
}

impl ChildKey {
    pub fn as_name(&self) -> Option<&str> {
        match self {
            ChildKey::Name(name) => Some(name),
            ChildKey::Index(_) => None,
        }
    }
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildKey::Name(name) => write!(f, "{}", name),
            ChildKey::Index(index) => write!(f, "{}", index),
        }
    }
}

impl From<&str> for ChildKey {
    fn from(name: &str) -> Self {
        ChildKey::Name(name.to_string())
    }
}

impl From<String> for ChildKey {
    fn from(name: String) -> Self {
        ChildKey::Name(name)
    }
}

impl From<usize> for ChildKey {
    fn from(index: usize) -> Self {
        ChildKey::Index(index)
    }
}

/// Structural path from a schema root down to a bound validator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ErrorPath(pub Vec<ChildKey>);

impl ErrorPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Path extended by one segment.
    pub fn join(&self, key: ChildKey) -> Self {
        let mut segments = self.0.clone();
        segments.push(key);
        Self(segments)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ErrorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                ChildKey::Index(index) => write!(f, "[{}]", index)?,
                ChildKey::Name(name) if i == 0 => write!(f, "{}", name)?,
                ChildKey::Name(name) => write!(f, ".{}", name)?,
            }
        }
        Ok(())
    }
}

/// A field error together with the path of the validator that owns it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathError {
    pub path: ErrorPath,
    pub error: FieldError,
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_root() {
            write!(f, "{}", self.error)
        } else {
            write!(f, "{}: {}", self.path, self.error)
        }
    }
}

// ============================================================================
// API Errors
// ============================================================================

/// Top-level error type for formbind.
#[derive(Error, Debug)]
pub enum FormbindError {
    #[error("Binding error: {0}")]
    Bind(#[from] BindError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors of the binding lifecycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    #[error("Owner already holds a live binding for '{key}'")]
    AlreadyBound { key: ChildKey },

    #[error("Validator {0} is not bound")]
    NotBound(NodeId),

    #[error("{kind} validator requires an owner")]
    OwnerRequired { kind: String },

    #[error("Owner has no validator '{key}' to compare with")]
    UnknownSibling { key: String },

    #[error("Index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Validator {0} has no children")]
    NotComposite(NodeId),

    #[error("Owner has no child definition for '{key}'")]
    UnknownKey { key: ChildKey },
}

/// Errors surfaced by standalone processing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessError {
    #[error("Conversion failed: {}", join_messages(.errors))]
    Conversion { errors: Vec<FieldError> },

    #[error("Validation failed: {}", join_messages(.errors))]
    Validation { errors: Vec<FieldError> },

    #[error("{check} check needs a bound owner")]
    OwnerRequired { check: String },

    #[error(transparent)]
    Bind(#[from] BindError),
}

impl ProcessError {
    /// Field errors carried by this failure, if any.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ProcessError::Conversion { errors } | ProcessError::Validation { errors } => errors,
            _ => &[],
        }
    }
}

fn join_messages(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from schema declaration and instances.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Schema has no field '{0}'")]
    UnknownField(String),

    #[error("Field '{0}' is declared twice")]
    DuplicateField(String),

    #[error("Schema input must be a map, got {0}")]
    NotAMap(String),

    #[error("Schema '{0}' is not registered")]
    UnknownSchema(String),

    #[error("Schema '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error(transparent)]
    Bind(#[from] BindError),
}

/// Errors from the event mechanism.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("Cannot {operation} through a {mode} alias")]
    Forbidden { operation: String, mode: String },

    #[error("Target has no listener storage")]
    NoStorage,

    #[error("Carried argument '{0}' is missing")]
    MissingCarry(String),

    #[error("Listener failed: {0}")]
    Hook(#[from] HookError),
}

/// Errors in a validator declaration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("Invalid pattern '{pattern}': {error}")]
    InvalidPattern { pattern: String, error: String },

    #[error("Invalid default for '{key}': {error}")]
    InvalidDefault { key: String, error: String },

    #[error("{0}")]
    Invalid(String),
}

/// Errors while loading engine configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {error}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type alias for formbind operations.
pub type FormbindResult<T> = Result<T, FormbindError>;

/// Result type alias for binding operations.
pub type BindResult<T> = Result<T, BindError>;

/// Result type alias for standalone processing.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Result type alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Result type alias for event operations.
pub type EventResult<T> = Result<T, EventError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

// ============================================================================
// Validation Report
// ============================================================================

/// Path-addressed errors collected from a whole binding tree.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// Whether every validator passed.
    pub success: bool,
    /// Errors in tree order.
    pub errors: Vec<PathError>,
}

impl ValidationReport {
    /// Create a new empty report (success).
    pub fn new() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
        }
    }

    pub fn add_error(&mut self, path: ErrorPath, error: FieldError) {
        self.success = false;
        self.errors.push(PathError { path, error });
    }

    /// Errors recorded at exactly this path.
    pub fn errors_at(&self, path: &ErrorPath) -> Vec<&FieldError> {
        self.errors
            .iter()
            .filter(|e| &e.path == path)
            .map(|e| &e.error)
            .collect()
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        if self.success {
            "✓ All fields are valid".to_string()
        } else {
            format!("✗ Validation failed with {} error(s)", self.errors.len())
        }
    }

    /// Get numbered error lines.
    pub fn detailed_errors(&self) -> Vec<String> {
        self.errors
            .iter()
            .enumerate()
            .map(|(i, error)| format!("{}. {}", i + 1, error))
            .collect()
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}
