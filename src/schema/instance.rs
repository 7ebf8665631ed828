//! Schema instances.

use crate::binding::{BindingTree, BoundValidator, MapValue, Owner, OwnerRef, Selector};
use crate::core::definition::ValidatorRef;
use crate::core::error::{
    BindError, BindResult, ChildKey, EventResult, FieldError, NodeId, SchemaError, SchemaResult,
    ValidationReport,
};
use crate::core::types::Value;
use crate::event::{notify, DefaultRegistrar, EventArgs, EventTarget, Listener, Listeners, PROCESSED};
use crate::schema::declaration::SchemaDefinition;
use indexmap::IndexMap;
use log::{debug, warn};
use std::sync::Arc;

/// Prefix of schema-level registrations that fan out to every field.
pub const BIND_PREFIX: &str = "bind:";

/// One instance of a schema, with every field bound.
#[derive(Debug)]
pub struct Schema {
    definition: Arc<SchemaDefinition>,
    tree: BindingTree,
    listeners: Listeners,
}

impl Schema {
    pub fn new(definition: Arc<SchemaDefinition>) -> SchemaResult<Self> {
        let mut tree = BindingTree::new(definition.fields().clone());
        for name in definition.field_names() {
            tree.bind(OwnerRef::Root, ChildKey::Name(name.to_string()))?;
        }
        debug!("Instantiated schema '{}'", definition.name());
        Ok(Self {
            definition,
            tree,
            listeners: Listeners::new(),
        })
    }

    pub fn definition(&self) -> &Arc<SchemaDefinition> {
        &self.definition
    }

    pub fn tree(&self) -> &BindingTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut BindingTree {
        &mut self.tree
    }

    /// Declared field names in order.
    pub fn keys(&self) -> Vec<String> {
        self.definition.field_names().map(str::to_string).collect()
    }

    /// Whether `name` currently has a live binding.
    pub fn contains(&self, name: &str) -> bool {
        self.tree.root().get(name).is_some()
    }

    fn known(&self, name: &str) -> SchemaResult<()> {
        if self.definition.field(name).is_some() {
            Ok(())
        } else {
            Err(SchemaError::UnknownField(name.to_string()))
        }
    }

    /// Live binding id of `name`; `None` after `remove`.
    pub fn field_id(&self, name: &str) -> SchemaResult<Option<NodeId>> {
        self.known(name)?;
        Ok(self.tree.root().get(name))
    }

    pub fn field(&self, name: &str) -> SchemaResult<Option<&BoundValidator>> {
        Ok(match self.field_id(name)? {
            Some(id) => Some(self.tree.get(id)?),
            None => None,
        })
    }

    pub fn field_mut(&mut self, name: &str) -> SchemaResult<Option<&mut BoundValidator>> {
        Ok(match self.field_id(name)? {
            Some(id) => Some(self.tree.get_mut(id)?),
            None => None,
        })
    }

    /// Process `value` through the field, re-binding it if it was removed.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> SchemaResult<()> {
        self.known(name)?;
        let id = self
            .tree
            .rebind(OwnerRef::Root, ChildKey::Name(name.to_string()))?;
        self.tree.process(id, value.into())?;
        Ok(())
    }

    /// Processed value of the field; `Undefined` when removed.
    pub fn get(&self, name: &str) -> SchemaResult<Value> {
        Ok(self
            .field(name)?
            .map(|f| f.value().clone())
            .unwrap_or_default())
    }

    /// Unbind the field. Returns whether a live binding was removed.
    pub fn remove(&mut self, name: &str) -> SchemaResult<bool> {
        match self.field_id(name)? {
            Some(id) => {
                self.tree.unbind(id)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Live view over a map field.
    pub fn map_value(&mut self, name: &str) -> SchemaResult<MapValue<'_>> {
        let id = self
            .field_id(name)?
            .ok_or_else(|| SchemaError::UnknownField(name.to_string()))?;
        Ok(self.tree.map_value(id)?)
    }

    /// Route each entry of a map to its field.
    ///
    /// Every key is checked before any field is touched. Fields missing
    /// from the input keep their state.
    pub fn process(&mut self, input: impl Into<Value>) -> SchemaResult<()> {
        let entries = match input.into() {
            Value::Map(entries) => entries,
            other => return Err(SchemaError::NotAMap(other.type_name().to_string())),
        };
        if let Some(unknown) = entries.keys().find(|k| self.definition.field(k).is_none()) {
            return Err(SchemaError::UnknownField(unknown.clone()));
        }
        for (name, value) in entries {
            self.set(&name, value)?;
        }
        let args = EventArgs::new().with_arg(self.value());
        if let Err(e) = notify(&self.listeners, PROCESSED, &args) {
            warn!("Processed notification for '{}' failed: {}", self.definition.name(), e);
        }
        Ok(())
    }

    /// Values of live fields. Fields without a value show as `Null`.
    pub fn value(&self) -> Value {
        Value::Map(
            self.tree
                .root()
                .live_children()
                .into_iter()
                .map(|(key, id)| {
                    let value = match self.tree.get(id).map(|n| n.value()) {
                        Ok(Value::Undefined) | Err(_) => Value::Null,
                        Ok(value) => value.clone(),
                    };
                    (key.to_string(), value)
                })
                .collect(),
        )
    }

    /// Own errors of each live field that has any.
    pub fn errors(&self) -> IndexMap<String, Vec<FieldError>> {
        self.tree
            .root()
            .live_children()
            .into_iter()
            .filter_map(|(key, id)| {
                let errors = self.tree.get(id).ok()?.errors().to_vec();
                (!errors.is_empty()).then(|| (key.to_string(), errors))
            })
            .collect()
    }

    /// Errors of every field and nested child, by path.
    pub fn report(&self) -> ValidationReport {
        self.tree.report()
    }

    /// Check every live field; no early exit.
    pub fn is_valid(&mut self) -> SchemaResult<bool> {
        let mut valid = true;
        for (_, id) in self.tree.root().live_children() {
            if !self.tree.is_valid(id)? {
                valid = false;
            }
        }
        Ok(valid)
    }

    /// Attach `listener` to the fields picked by `selector`, including
    /// ones bound later.
    pub fn listen_for(&self, selector: Selector, event: &str, listener: Listener) {
        self.tree.add_bind_hook(selector, event, listener);
    }
}

impl Owner for Schema {
    fn child(&self, key: &ChildKey) -> Option<NodeId> {
        self.tree.root().child(key)
    }

    /// Clearing unbinds the live field. Recording only accepts the id
    /// already bound under `key`.
    fn set_child(&mut self, key: &ChildKey, id: Option<NodeId>) -> BindResult<()> {
        let current = self.tree.root().child(key);
        match (id, current) {
            (None, Some(live)) => self.tree.unbind(live),
            (None, None) => Ok(()),
            (Some(id), Some(live)) if id == live => Ok(()),
            (Some(_), Some(_)) => Err(BindError::AlreadyBound { key: key.clone() }),
            (Some(id), None) => Err(BindError::NotBound(id)),
        }
    }

    fn prototype(&self, key: &ChildKey) -> Option<ValidatorRef> {
        self.tree.root().prototype(key)
    }

    fn child_keys(&self) -> Vec<ChildKey> {
        self.tree.root().child_keys()
    }
}

impl EventTarget for Schema {
    fn storage(&self) -> Option<&Listeners> {
        Some(&self.listeners)
    }

    /// `bind:<event>` fans out to every field, present and future.
    fn on_add_listener(
        &self,
        event: &str,
        listener: Listener,
        default: DefaultRegistrar<'_>,
    ) -> EventResult<()> {
        match event.strip_prefix(BIND_PREFIX) {
            Some(field_event) => {
                self.tree.add_bind_hook(Selector::All, field_event, listener);
                Ok(())
            }
            None => default(event, listener),
        }
    }
}
