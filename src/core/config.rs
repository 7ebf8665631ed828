//! Engine configuration.
//!
//! Loaded from TOML and handed to a `DeclarationRegistry`, which applies it
//! to every definition it declares. Settings given explicitly on a
//! definition always win.
//!
//! ```toml
//! strict_maps = false
//!
//! [boolean]
//! trues = ["1", "yes", "ja"]
//! falses = ["0", "no", "nein"]
//!
//! [messages]
//! required_error = "Please fill in this field"
//! ```

use crate::core::definition::{BooleanLiterals, Kind, ValidatorDefinition};
use crate::core::error::{ConfigError, ConfigResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reject unknown keys in maps that do not choose a mode.
    pub strict_maps: bool,
    /// Literals for boolean validators declared without their own.
    pub boolean: BooleanLiterals,
    /// Template overrides applied under every definition's own.
    pub messages: IndexMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_maps: true,
            boolean: BooleanLiterals::default(),
            messages: IndexMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Read configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.display().to_string(),
            error,
        })?;
        Self::from_toml_str(&source)
    }

    /// Fill unset options of `def` and of every nested definition.
    pub fn apply(&self, def: &mut ValidatorDefinition) {
        for (id, template) in &self.messages {
            def.messages
                .entry(id.clone())
                .or_insert_with(|| template.clone());
        }
        match &mut def.kind {
            Kind::Boolean(literals @ None) => *literals = Some(self.boolean.clone()),
            Kind::List { element } => {
                let mut inner = (**element).clone();
                self.apply(&mut inner);
                *element = Arc::new(inner);
            }
            Kind::AnyOf { options } => {
                for option in options.iter_mut() {
                    let mut inner = (**option).clone();
                    self.apply(&mut inner);
                    *option = Arc::new(inner);
                }
            }
            Kind::Map { fields, strict } => {
                if strict.is_none() {
                    *strict = Some(self.strict_maps);
                }
                for child in fields.values_mut() {
                    let mut inner = (**child).clone();
                    self.apply(&mut inner);
                    *child = Arc::new(inner);
                }
            }
            _ => {}
        }
    }
}
