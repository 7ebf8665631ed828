//! Owners of bound validators.
//!
//! An owner maps child keys to live bindings. The schema root and map
//! validators own named fields; list validators own positional elements;
//! any-of validators own one binding per alternative.

use crate::core::definition::ValidatorRef;
use crate::core::error::{BindError, BindResult, ChildKey, NodeId};
use indexmap::IndexMap;

/// Non-owning handle from a bound validator back to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerRef {
    /// Synthetic throwaway owner of a standalone validator.
    Detached,
    /// The root field table of a binding tree.
    Root,
    /// A composite bound validator.
    Node(NodeId),
}

/// Keyed access to an owner's children.
pub trait Owner {
    /// Live binding under `key`.
    fn child(&self, key: &ChildKey) -> Option<NodeId>;

    /// Record or clear the binding under `key`.
    fn set_child(&mut self, key: &ChildKey, id: Option<NodeId>) -> BindResult<()>;

    /// Definition a binding under `key` is created from.
    fn prototype(&self, key: &ChildKey) -> Option<ValidatorRef>;

    /// Keys in order, bound or not.
    fn child_keys(&self) -> Vec<ChildKey>;

    /// Live bindings in key order.
    fn live_children(&self) -> Vec<(ChildKey, NodeId)> {
        self.child_keys()
            .into_iter()
            .filter_map(|key| self.child(&key).map(|id| (key, id)))
            .collect()
    }
}

// ============================================================================
// Named fields
// ============================================================================

/// Fixed, ordered set of named child definitions with their live bindings.
#[derive(Debug, Clone, Default)]
pub struct FieldTable {
    prototypes: IndexMap<String, ValidatorRef>,
    slots: IndexMap<String, NodeId>,
}

impl FieldTable {
    pub fn new(prototypes: IndexMap<String, ValidatorRef>) -> Self {
        Self {
            prototypes,
            slots: IndexMap::new(),
        }
    }

    /// Declared field names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.prototypes.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.prototypes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<NodeId> {
        self.slots.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }
}

impl Owner for FieldTable {
    fn child(&self, key: &ChildKey) -> Option<NodeId> {
        key.as_name().and_then(|name| self.get(name))
    }

    fn set_child(&mut self, key: &ChildKey, id: Option<NodeId>) -> BindResult<()> {
        let name = match key.as_name() {
            Some(name) if self.prototypes.contains_key(name) => name,
            _ => return Err(BindError::UnknownKey { key: key.clone() }),
        };
        match id {
            Some(id) => {
                self.slots.insert(name.to_string(), id);
            }
            None => {
                self.slots.shift_remove(name);
            }
        }
        Ok(())
    }

    fn prototype(&self, key: &ChildKey) -> Option<ValidatorRef> {
        key.as_name()
            .and_then(|name| self.prototypes.get(name))
            .cloned()
    }

    fn child_keys(&self) -> Vec<ChildKey> {
        self.prototypes
            .keys()
            .map(|name| ChildKey::Name(name.clone()))
            .collect()
    }
}

// ============================================================================
// Positional elements
// ============================================================================

/// One element definition and the bindings created from it, by position.
#[derive(Debug, Clone)]
pub struct ElementTable {
    element: ValidatorRef,
    slots: Vec<NodeId>,
}

impl ElementTable {
    pub fn new(element: ValidatorRef) -> Self {
        Self {
            element,
            slots: Vec::new(),
        }
    }

    pub fn element(&self) -> &ValidatorRef {
        &self.element
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Forget every element binding, returning their ids.
    pub fn take(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.slots)
    }

    /// Binding at `index`, or an out-of-range error.
    pub fn at(&self, index: usize) -> BindResult<NodeId> {
        self.slots
            .get(index)
            .copied()
            .ok_or(BindError::IndexOutOfRange {
                index,
                len: self.slots.len(),
            })
    }
}

impl Owner for ElementTable {
    fn child(&self, key: &ChildKey) -> Option<NodeId> {
        match key {
            ChildKey::Index(index) => self.slots.get(*index).copied(),
            ChildKey::Name(_) => None,
        }
    }

    /// Setting at `len` appends; clearing removes and shifts later elements.
    fn set_child(&mut self, key: &ChildKey, id: Option<NodeId>) -> BindResult<()> {
        let ChildKey::Index(index) = *key else {
            return Err(BindError::UnknownKey { key: key.clone() });
        };
        let len = self.slots.len();
        match id {
            Some(id) if index < len => self.slots[index] = id,
            Some(id) if index == len => self.slots.push(id),
            None if index < len => {
                self.slots.remove(index);
            }
            _ => return Err(BindError::IndexOutOfRange { index, len }),
        }
        Ok(())
    }

    fn prototype(&self, key: &ChildKey) -> Option<ValidatorRef> {
        match key {
            ChildKey::Index(_) => Some(self.element.clone()),
            ChildKey::Name(_) => None,
        }
    }

    fn child_keys(&self) -> Vec<ChildKey> {
        (0..self.slots.len()).map(ChildKey::Index).collect()
    }
}

// ============================================================================
// Alternatives
// ============================================================================

/// Alternative definitions, each bound once, and the one holding the value.
#[derive(Debug, Clone)]
pub struct OptionTable {
    options: Vec<ValidatorRef>,
    slots: Vec<Option<NodeId>>,
    current: Option<usize>,
}

impl OptionTable {
    pub fn new(options: Vec<ValidatorRef>) -> Self {
        let slots = vec![None; options.len()];
        Self {
            options,
            slots,
            current: None,
        }
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Position of the alternative holding the value.
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn select(&mut self, index: Option<usize>) {
        self.current = index.filter(|i| *i < self.options.len());
    }

    /// Binding of the alternative holding the value.
    pub fn selected(&self) -> Option<(ChildKey, NodeId)> {
        let index = self.current?;
        let id = self.slots.get(index).copied().flatten()?;
        Some((ChildKey::Index(index), id))
    }
}

impl Owner for OptionTable {
    fn child(&self, key: &ChildKey) -> Option<NodeId> {
        match key {
            ChildKey::Index(index) => self.slots.get(*index).copied().flatten(),
            ChildKey::Name(_) => None,
        }
    }

    /// Clearing the selected alternative also clears the selection.
    fn set_child(&mut self, key: &ChildKey, id: Option<NodeId>) -> BindResult<()> {
        let ChildKey::Index(index) = *key else {
            return Err(BindError::UnknownKey { key: key.clone() });
        };
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(BindError::IndexOutOfRange { index, len })?;
        *slot = id;
        if id.is_none() && self.current == Some(index) {
            self.current = None;
        }
        Ok(())
    }

    fn prototype(&self, key: &ChildKey) -> Option<ValidatorRef> {
        match key {
            ChildKey::Index(index) => self.options.get(*index).cloned(),
            ChildKey::Name(_) => None,
        }
    }

    fn child_keys(&self) -> Vec<ChildKey> {
        (0..self.options.len()).map(ChildKey::Index).collect()
    }
}

/// Child table of a composite bound validator.
#[derive(Debug, Clone)]
pub enum Children {
    Fields(FieldTable),
    Elements(ElementTable),
    Options(OptionTable),
}

impl Owner for Children {
    fn child(&self, key: &ChildKey) -> Option<NodeId> {
        match self {
            Children::Fields(table) => table.child(key),
            Children::Elements(table) => table.child(key),
            Children::Options(table) => table.child(key),
        }
    }

    fn set_child(&mut self, key: &ChildKey, id: Option<NodeId>) -> BindResult<()> {
        match self {
            Children::Fields(table) => table.set_child(key, id),
            Children::Elements(table) => table.set_child(key, id),
            Children::Options(table) => table.set_child(key, id),
        }
    }

    fn prototype(&self, key: &ChildKey) -> Option<ValidatorRef> {
        match self {
            Children::Fields(table) => table.prototype(key),
            Children::Elements(table) => table.prototype(key),
            Children::Options(table) => table.prototype(key),
        }
    }

    fn child_keys(&self) -> Vec<ChildKey> {
        match self {
            Children::Fields(table) => table.child_keys(),
            Children::Elements(table) => table.child_keys(),
            Children::Options(table) => table.child_keys(),
        }
    }
}
