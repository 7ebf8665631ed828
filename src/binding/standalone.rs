//! Standalone processing of a single definition.

use crate::binding::tree::{BindingTree, BoundValidator};
use crate::core::definition::ValidatorDefinition;
use crate::core::error::{
    BindResult, EventResult, FieldError, NodeId, ProcessError, ProcessResult, ValidationReport,
};
use crate::core::types::Value;
use crate::event::{DefaultProvider, EventTarget, Listener, Listeners};
use std::sync::Arc;

/// A definition bound to a throwaway owner.
///
/// Failures come back as `Err` instead of being stored. Checks that need a
/// real owner fail with [`ProcessError::OwnerRequired`].
#[derive(Debug)]
pub struct Standalone {
    tree: BindingTree,
    node: NodeId,
}

impl ValidatorDefinition {
    /// Bind a copy of this definition for standalone use.
    pub fn standalone(&self) -> BindResult<Standalone> {
        let mut tree = BindingTree::detached();
        let node = tree.bind_detached(Arc::new(self.clone()))?;
        Ok(Standalone { tree, node })
    }
}

impl Standalone {
    /// Convert and validate `input`, returning the processed value.
    pub fn process(&mut self, input: impl Into<Value>) -> ProcessResult<Value> {
        self.tree.process(self.node, input.into())?;

        let errors = self.collected_errors()?;
        if !errors.is_empty() {
            return Err(if errors.iter().any(FieldError::is_conversion) {
                ProcessError::Conversion { errors }
            } else {
                ProcessError::Validation { errors }
            });
        }

        let node = self.bound()?;
        if node.raw_value().is_absent() {
            if node.options().optional {
                return Ok(Value::Undefined);
            }
            return Err(ProcessError::OwnerRequired {
                check: "required".to_string(),
            });
        }

        if !self.tree.is_valid(self.node)? {
            return Err(ProcessError::Validation {
                errors: self.collected_errors()?,
            });
        }
        Ok(self.bound()?.value().clone())
    }

    pub fn bound(&self) -> BindResult<&BoundValidator> {
        self.tree.get(self.node)
    }

    pub fn options_mut(&mut self) -> BindResult<&mut ValidatorDefinition> {
        Ok(self.tree.get_mut(self.node)?.options_mut())
    }

    pub fn value(&self) -> Value {
        self.bound().map(|n| n.value().clone()).unwrap_or_default()
    }

    pub fn report(&self) -> BindResult<ValidationReport> {
        self.tree.report_for(self.node)
    }

    pub fn tree(&self) -> &BindingTree {
        &self.tree
    }

    fn collected_errors(&self) -> BindResult<Vec<FieldError>> {
        Ok(self
            .report()?
            .errors
            .into_iter()
            .map(|e| e.error)
            .collect())
    }
}

impl EventTarget for Standalone {
    fn storage(&self) -> Option<&Listeners> {
        self.bound().ok().and_then(|n| n.storage())
    }

    fn on_get_listeners(
        &self,
        event: &str,
        default: DefaultProvider<'_>,
    ) -> EventResult<Vec<Listener>> {
        match self.bound() {
            Ok(node) => node.on_get_listeners(event, default),
            Err(_) => default(event),
        }
    }
}
