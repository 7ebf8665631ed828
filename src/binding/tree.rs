//! Binding tree: the arena of bound validators.
//!
//! Every bound validator of one schema instance (or one standalone
//! validator) lives in a single `BindingTree`, addressed by [`NodeId`].
//! Children point back at their owner with an [`OwnerRef`]; owners keep
//! child ids in their field or element tables. This keeps the tree free of
//! reference cycles and lets cross-field validators reach siblings through
//! their owner.

use crate::binding::owner::{Children, ElementTable, FieldTable, OptionTable, Owner, OwnerRef};
use crate::binding::proxy::MapValue;
use crate::core::definition::{HashAlgorithm, Kind, KindTag, ValidatorDefinition, ValidatorRef};
use crate::core::error::{
    BindError, BindResult, ChildKey, ErrorPath, EventError, FieldError, HookError, NodeId,
    ValidationReport,
};
use crate::core::messages::render_error;
use crate::core::types::{Value, ValueType};
use crate::event::{
    notify, pipeline, BoundHooks, Carry, DefaultProvider, EventArgs, EventTarget, Listener,
    Listeners, BIND, POSTVALIDATE, PREVALIDATE, PROCESSED, UNBIND,
};
use crate::validators::{check, convert, convert_scalar, hash_password, length_rule};
use indexmap::IndexMap;
use log::{debug, trace, warn};
use parking_lot::RwLock;
use std::fmt;

/// Which bindings a tree-wide listener registration reaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every top-level field.
    All,
    /// The top-level field with this key.
    Key(String),
    /// Every binding of this kind, at any depth.
    Kind(KindTag),
}

impl Selector {
    pub fn matches(&self, node: &BoundValidator) -> bool {
        match self {
            Selector::All => node.owner == OwnerRef::Root,
            Selector::Key(key) => {
                node.owner == OwnerRef::Root && node.key.as_name() == Some(key.as_str())
            }
            Selector::Kind(tag) => node.definition.kind.tag() == *tag,
        }
    }
}

#[derive(Clone)]
struct BindHook {
    selector: Selector,
    event: String,
    listener: Listener,
}

/// A definition bound to an owner, with its own processing state.
#[derive(Clone)]
pub struct BoundValidator {
    id: NodeId,
    key: ChildKey,
    owner: OwnerRef,
    prototype: ValidatorRef,
    definition: ValidatorDefinition,
    raw_value: Value,
    value: Value,
    errors: Vec<FieldError>,
    children: Option<Children>,
    hooks: BoundHooks,
}

impl fmt::Debug for BoundValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundValidator")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("kind", &self.definition.kind.tag())
            .field("raw_value", &self.raw_value)
            .field("value", &self.value)
            .field("errors", &self.errors)
            .finish()
    }
}

impl BoundValidator {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn key(&self) -> &ChildKey {
        &self.key
    }

    pub fn owner(&self) -> OwnerRef {
        self.owner
    }

    /// The shared definition this binding was created from.
    pub fn prototype(&self) -> &ValidatorRef {
        &self.prototype
    }

    /// This binding's copy of the definition.
    pub fn options(&self) -> &ValidatorDefinition {
        &self.definition
    }

    /// Mutable copy of the definition. Changes affect only this binding.
    pub fn options_mut(&mut self) -> &mut ValidatorDefinition {
        &mut self.definition
    }

    /// Last input, or `Undefined`.
    pub fn raw_value(&self) -> &Value {
        &self.raw_value
    }

    /// Last processed output, or `Undefined`. Composites hold a snapshot
    /// of their children kept in sync by the tree.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn label(&self) -> String {
        self.definition.label()
    }

    pub fn children(&self) -> Option<&Children> {
        self.children.as_ref()
    }

    pub fn is_composite(&self) -> bool {
        self.children.is_some()
    }

    pub fn hooks(&self) -> &BoundHooks {
        &self.hooks
    }

    /// Processed without errors into a value.
    fn holds_value(&self) -> bool {
        self.errors.is_empty() && !self.value.is_undefined()
    }
}

impl EventTarget for BoundValidator {
    fn storage(&self) -> Option<&Listeners> {
        self.hooks.storage()
    }

    fn on_get_listeners(
        &self,
        event: &str,
        default: DefaultProvider<'_>,
    ) -> crate::core::error::EventResult<Vec<Listener>> {
        self.hooks.on_get_listeners(event, default)
    }
}

/// Result of one pipeline run.
struct Outcome {
    value: Value,
    errors: Vec<FieldError>,
}

impl Outcome {
    fn ok(value: Value) -> Self {
        Self {
            value,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<FieldError>) -> Self {
        Self {
            value: Value::Undefined,
            errors,
        }
    }
}

/// Arena of bound validators under one root field table.
pub struct BindingTree {
    nodes: IndexMap<NodeId, BoundValidator>,
    root: FieldTable,
    bind_hooks: RwLock<Vec<BindHook>>,
}

impl fmt::Debug for BindingTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingTree")
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl Default for BindingTree {
    fn default() -> Self {
        Self::detached()
    }
}

impl BindingTree {
    /// Tree whose root owns the given named fields. Nothing is bound yet.
    pub fn new(fields: IndexMap<String, ValidatorRef>) -> Self {
        Self {
            nodes: IndexMap::new(),
            root: FieldTable::new(fields),
            bind_hooks: RwLock::new(Vec::new()),
        }
    }

    /// Tree with an empty root, for standalone bindings.
    pub fn detached() -> Self {
        Self::new(IndexMap::new())
    }

    pub fn root(&self) -> &FieldTable {
        &self.root
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn get(&self, id: NodeId) -> BindResult<&BoundValidator> {
        self.nodes.get(&id).ok_or(BindError::NotBound(id))
    }

    pub fn get_mut(&mut self, id: NodeId) -> BindResult<&mut BoundValidator> {
        self.nodes.get_mut(&id).ok_or(BindError::NotBound(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of live bindings at any depth.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &BoundValidator> {
        self.nodes.values()
    }

    fn owner_table(&self, owner: OwnerRef) -> Option<&dyn Owner> {
        match owner {
            OwnerRef::Detached => None,
            OwnerRef::Root => Some(&self.root),
            OwnerRef::Node(id) => self
                .nodes
                .get(&id)
                .and_then(|n| n.children.as_ref())
                .map(|c| c as &dyn Owner),
        }
    }

    fn owner_table_mut(&mut self, owner: OwnerRef) -> Option<&mut dyn Owner> {
        match owner {
            OwnerRef::Detached => None,
            OwnerRef::Root => Some(&mut self.root),
            OwnerRef::Node(id) => self
                .nodes
                .get_mut(&id)
                .and_then(|n| n.children.as_mut())
                .map(|c| c as &mut dyn Owner),
        }
    }

    /// Live binding under `key` of `owner`.
    pub fn child(&self, owner: OwnerRef, key: &ChildKey) -> Option<NodeId> {
        self.owner_table(owner).and_then(|t| t.child(key))
    }

    /// Live children of a composite binding, in order.
    pub fn children(&self, id: NodeId) -> BindResult<Vec<(ChildKey, NodeId)>> {
        self.get(id)?
            .children
            .as_ref()
            .map(|c| c.live_children())
            .ok_or(BindError::NotComposite(id))
    }

    /// Element binding at `index` of a list binding.
    pub fn element(&self, id: NodeId, index: usize) -> BindResult<NodeId> {
        match &self.get(id)?.children {
            Some(Children::Elements(table)) => table.at(index),
            _ => Err(BindError::NotComposite(id)),
        }
    }

    /// Field binding `name` of a map binding; `None` when it was removed.
    pub fn field(&self, id: NodeId, name: &str) -> BindResult<Option<NodeId>> {
        match &self.get(id)?.children {
            Some(Children::Fields(table)) if table.contains(name) => Ok(table.get(name)),
            Some(Children::Fields(_)) => Err(BindError::UnknownKey { key: name.into() }),
            _ => Err(BindError::NotComposite(id)),
        }
    }

    /// Alternative currently holding the value of an any-of binding.
    pub fn selected_option(&self, id: NodeId) -> BindResult<Option<NodeId>> {
        match &self.get(id)?.children {
            Some(Children::Options(table)) => Ok(table.selected().map(|(_, child)| child)),
            _ => Err(BindError::NotComposite(id)),
        }
    }

    /// Structural path from the root to a binding.
    pub fn path(&self, id: NodeId) -> BindResult<ErrorPath> {
        let mut segments = Vec::new();
        let mut current = id;
        loop {
            let node = self.get(current)?;
            match node.owner {
                OwnerRef::Detached => break,
                OwnerRef::Root => {
                    segments.push(node.key.clone());
                    break;
                }
                OwnerRef::Node(parent) => {
                    segments.push(node.key.clone());
                    current = parent;
                }
            }
        }
        segments.reverse();
        Ok(ErrorPath(segments))
    }

    // ========================================================================
    // Binding lifecycle
    // ========================================================================

    /// Bind the prototype registered under `key` of `owner`.
    pub fn bind(&mut self, owner: OwnerRef, key: ChildKey) -> BindResult<NodeId> {
        let table = match owner {
            OwnerRef::Node(id) => self
                .get(id)?
                .children
                .as_ref()
                .map(|c| c as &dyn Owner)
                .ok_or(BindError::NotComposite(id))?,
            other => self.owner_table(other).ok_or_else(|| BindError::OwnerRequired {
                kind: "Keyed".to_string(),
            })?,
        };
        let prototype = table
            .prototype(&key)
            .ok_or_else(|| BindError::UnknownKey { key: key.clone() })?;
        if table.child(&key).is_some() {
            return Err(BindError::AlreadyBound { key });
        }
        self.attach(owner, key, prototype)
    }

    /// Bind a definition to a synthetic throwaway owner.
    pub fn bind_detached(&mut self, prototype: ValidatorRef) -> BindResult<NodeId> {
        let key = ChildKey::Name(prototype.key.clone().unwrap_or_default());
        self.attach(OwnerRef::Detached, key, prototype)
    }

    /// Live binding under `key`, re-created from the prototype if it was
    /// removed.
    pub fn rebind(&mut self, owner: OwnerRef, key: ChildKey) -> BindResult<NodeId> {
        if let Some(id) = self.child(owner, &key) {
            return Ok(id);
        }
        let label = key.to_string();
        let id = self.bind(owner, key)?;
        debug!("Re-bound '{}' as {}", label, id);
        Ok(id)
    }

    fn attach(&mut self, owner: OwnerRef, key: ChildKey, prototype: ValidatorRef) -> BindResult<NodeId> {
        if let Kind::EqualTo { target } = &prototype.kind {
            let table = self
                .owner_table(owner)
                .ok_or_else(|| BindError::OwnerRequired {
                    kind: KindTag::EqualTo.to_string(),
                })?;
            if table.prototype(&ChildKey::Name(target.clone())).is_none() {
                return Err(BindError::UnknownSibling {
                    key: target.clone(),
                });
            }
        }
        if let Kind::List { element } = &prototype.kind {
            check_bindable(element, None)?;
        }

        let id = NodeId::new();
        let hooks = BoundHooks::new(&prototype.listeners);
        let mut definition = (*prototype).clone();
        definition.listeners = hooks.own().clone();
        let children = match &prototype.kind {
            Kind::Map { fields, .. } => Some(Children::Fields(FieldTable::new(fields.clone()))),
            Kind::List { element } => Some(Children::Elements(ElementTable::new(element.clone()))),
            Kind::AnyOf { options } => Some(Children::Options(OptionTable::new(options.clone()))),
            _ => None,
        };
        let node = BoundValidator {
            id,
            key: key.clone(),
            owner,
            prototype: prototype.clone(),
            definition,
            raw_value: Value::Undefined,
            value: Value::Undefined,
            errors: Vec::new(),
            children,
            hooks,
        };
        self.apply_bind_hooks(&node);
        self.nodes.insert(id, node);
        if let Some(table) = self.owner_table_mut(owner) {
            table.set_child(&key, Some(id))?;
        }
        debug!("Bound '{}' ({}) as {}", key, prototype.kind.tag(), id);

        if let Kind::Map { fields, .. } = &prototype.kind {
            for (name, field) in fields {
                self.attach(OwnerRef::Node(id), ChildKey::Name(name.clone()), field.clone())?;
            }
            let snapshot = self.snapshot(id)?;
            self.get_mut(id)?.value = snapshot;
        }
        if let Kind::AnyOf { options } = &prototype.kind {
            for (index, option) in options.iter().enumerate() {
                self.attach(OwnerRef::Node(id), ChildKey::Index(index), option.clone())?;
            }
        }
        if prototype.default.is_some() {
            self.process_node(id, prototype.default.produce())?;
        }

        let node = self.get(id)?;
        let args = EventArgs::new().with_arg(node.key.to_string());
        if let Err(e) = notify(node, BIND, &args) {
            warn!("Bind notification for '{}' failed: {}", key, e);
        }
        Ok(id)
    }

    /// Remove a binding and its descendants from its owner.
    pub fn unbind(&mut self, id: NodeId) -> BindResult<()> {
        let (owner, key) = {
            let node = self.get(id)?;
            (node.owner, node.key.clone())
        };
        self.drop_subtree(id);
        if let Some(table) = self.owner_table_mut(owner) {
            table.set_child(&key, None)?;
        }
        if let OwnerRef::Node(parent) = owner {
            self.rekey_elements(parent);
        }
        self.refresh_from(owner);
        Ok(())
    }

    fn drop_subtree(&mut self, id: NodeId) {
        let Some(node) = self.nodes.shift_remove(&id) else {
            return;
        };
        if let Some(children) = &node.children {
            for (_, child) in children.live_children() {
                self.drop_subtree(child);
            }
        }
        debug!("Unbound '{}' ({})", node.key, id);
        let args = EventArgs::new().with_arg(node.key.to_string());
        if let Err(e) = notify(&node, UNBIND, &args) {
            warn!("Unbind notification for '{}' failed: {}", node.key, e);
        }
    }

    fn rekey_elements(&mut self, parent: NodeId) {
        let ids = match self.nodes.get(&parent).and_then(|n| n.children.as_ref()) {
            Some(Children::Elements(table)) => table.ids().to_vec(),
            _ => return,
        };
        for (index, id) in ids.into_iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.key = ChildKey::Index(index);
            }
        }
    }

    fn clear_elements(&mut self, id: NodeId) -> BindResult<()> {
        let ids = match self.get_mut(id)?.children.as_mut() {
            Some(Children::Elements(table)) => table.take(),
            _ => return Err(BindError::NotComposite(id)),
        };
        for child in ids {
            self.drop_subtree(child);
        }
        Ok(())
    }

    /// Attach `listener` for `event` to every current and future binding
    /// matched by `selector`.
    pub fn add_bind_hook(&self, selector: Selector, event: &str, listener: Listener) {
        for node in self.nodes.values() {
            if selector.matches(node) {
                node.hooks.own().push(event, listener.clone());
            }
        }
        self.bind_hooks.write().push(BindHook {
            selector,
            event: event.to_string(),
            listener,
        });
    }

    fn apply_bind_hooks(&self, node: &BoundValidator) {
        for hook in self.bind_hooks.read().iter() {
            if hook.selector.matches(node) {
                node.hooks.own().push(&hook.event, hook.listener.clone());
            }
        }
    }

    // ========================================================================
    // Processing
    // ========================================================================

    /// Run the processing pipeline of a binding on `input`.
    ///
    /// Failures are recorded in the binding's errors; the only `Err` is a
    /// stale id.
    pub fn process(&mut self, id: NodeId, input: Value) -> BindResult<()> {
        self.process_node(id, input)?;
        let owner = self.get(id)?.owner;
        self.refresh_from(owner);
        Ok(())
    }

    fn process_node(&mut self, id: NodeId, input: Value) -> BindResult<()> {
        let (def, hooks, key) = {
            let node = self.get_mut(id)?;
            node.errors.clear();
            node.raw_value = input.clone();
            (node.definition.clone(), node.hooks.clone(), node.key.to_string())
        };
        trace!("Processing '{}' ({}) with {:?}", key, def.kind.tag(), input);

        let outcome = match &def.kind {
            Kind::List { element } => self.process_list(id, &def, &hooks, &key, element, input)?,
            Kind::Map { fields, .. } => self.process_map(id, &def, &hooks, &key, fields, input)?,
            Kind::AnyOf { options } => {
                self.process_any_of(id, &def, &hooks, &key, options.len(), input)?
            }
            Kind::EqualTo { target } => {
                let sibling = self.sibling_definition(id, target);
                run_stages(&def, &hooks, &key, input, |value| match &sibling {
                    Some(other) if !other.kind.is_composite() => {
                        convert(other, &value).map_err(|errors| render_all(other, errors))
                    }
                    Some(_) => Ok(value),
                    None => Err(vec![render_error(
                        &def,
                        FieldError::validation("unknown_sibling").with_param("key", target.clone()),
                    )]),
                })
            }
            Kind::Password(algorithm) => run_stages(&def, &hooks, &key, input, |value| {
                convert_password(&def, *algorithm, value)
            }),
            _ => run_stages(&def, &hooks, &key, input, |value| {
                convert(&def, &value).map_err(|errors| render_all(&def, errors))
            }),
        };

        let node = self.get_mut(id)?;
        node.value = outcome.value;
        node.errors.extend(outcome.errors);
        trace!("Processed '{}': {:?}, {} error(s)", key, node.value, node.errors.len());

        let node = self.get(id)?;
        let args = EventArgs::new()
            .with_arg(node.value.clone())
            .with_named("key", key.clone());
        if let Err(e) = notify(node, PROCESSED, &args) {
            warn!("Processed notification for '{}' failed: {}", key, e);
        }
        Ok(())
    }

    fn process_list(
        &mut self,
        id: NodeId,
        def: &ValidatorDefinition,
        hooks: &BoundHooks,
        key: &str,
        element: &ValidatorRef,
        input: Value,
    ) -> BindResult<Outcome> {
        self.clear_elements(id)?;
        if input.is_absent() {
            return Ok(Outcome::ok(Value::Undefined));
        }
        let input = match run_hook(def, hooks, PREVALIDATE, key, input) {
            Ok(value) => value,
            Err(e) => return Ok(Outcome::failed(vec![e])),
        };
        let items = match input {
            Value::List(items) => items,
            Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
            Value::Undefined | Value::Null => return Ok(Outcome::ok(Value::Undefined)),
            map @ Value::Map(_) => {
                let error = conversion_error(map, &ValueType::List(Box::new(ValueType::Any)));
                return Ok(Outcome::failed(vec![render_error(def, error)]));
            }
            scalar => vec![scalar],
        };
        for (index, item) in items.into_iter().enumerate() {
            let child = self.attach(OwnerRef::Node(id), ChildKey::Index(index), element.clone())?;
            self.process_node(child, item)?;
        }
        let snapshot = self.snapshot(id)?;
        Ok(check_composite(def, hooks, key, snapshot, Vec::new()))
    }

    fn process_map(
        &mut self,
        id: NodeId,
        def: &ValidatorDefinition,
        hooks: &BoundHooks,
        key: &str,
        fields: &IndexMap<String, ValidatorRef>,
        input: Value,
    ) -> BindResult<Outcome> {
        if input.is_absent() {
            return Ok(Outcome::ok(Value::Undefined));
        }
        let entries = match run_hook(def, hooks, PREVALIDATE, key, input) {
            Ok(Value::Map(entries)) => entries,
            Ok(Value::Undefined | Value::Null) => return Ok(Outcome::ok(Value::Undefined)),
            Ok(other) => {
                let error = conversion_error(other, &ValueType::Map);
                return Ok(Outcome::failed(vec![render_error(def, error)]));
            }
            Err(e) => return Ok(Outcome::failed(vec![e])),
        };

        let owner = OwnerRef::Node(id);
        let missing: Vec<(String, ValidatorRef)> = fields
            .iter()
            .filter(|(name, _)| !entries.contains_key(name.as_str()))
            .map(|(name, field)| (name.clone(), field.clone()))
            .collect();
        let mut errors = Vec::new();
        for (name, value) in entries {
            if fields.contains_key(&name) {
                let child = self.rebind(owner, ChildKey::Name(name))?;
                self.process_node(child, value)?;
            } else if def.is_strict() {
                errors.push(render_error(
                    def,
                    FieldError::validation("unknown_key").with_param("key", name),
                ));
            } else {
                warn!("Dropping unknown key '{}' of map '{}'", name, key);
            }
        }
        for (name, field) in missing {
            let child = self.rebind(owner, ChildKey::Name(name))?;
            self.process_node(child, field.default.produce())?;
        }

        let snapshot = self.snapshot(id)?;
        Ok(check_composite(def, hooks, key, snapshot, errors))
    }

    /// Every alternative sees the same input; the first that converts it
    /// without errors is selected.
    fn process_any_of(
        &mut self,
        id: NodeId,
        def: &ValidatorDefinition,
        hooks: &BoundHooks,
        key: &str,
        count: usize,
        input: Value,
    ) -> BindResult<Outcome> {
        self.select_option(id, None)?;
        if input.is_absent() {
            return Ok(Outcome::ok(Value::Undefined));
        }
        let input = match run_hook(def, hooks, PREVALIDATE, key, input) {
            Ok(value) if value.is_absent() => return Ok(Outcome::ok(Value::Undefined)),
            Ok(value) => value,
            Err(e) => return Ok(Outcome::failed(vec![e])),
        };

        let owner = OwnerRef::Node(id);
        for index in 0..count {
            let child = self.rebind(owner, ChildKey::Index(index))?;
            self.process_node(child, input.clone())?;
            if self.get(child)?.holds_value() {
                trace!("'{}' matched alternative {}", key, index);
                self.select_option(id, Some(index))?;
                let snapshot = self.snapshot(id)?;
                return Ok(check_composite(def, hooks, key, snapshot, Vec::new()));
            }
        }
        let error = FieldError::conversion("no_matching_option").with_param("value", input);
        Ok(Outcome::failed(vec![render_error(def, error)]))
    }

    fn select_option(&mut self, id: NodeId, index: Option<usize>) -> BindResult<()> {
        match self.get_mut(id)?.children.as_mut() {
            Some(Children::Options(table)) => {
                table.select(index);
                Ok(())
            }
            _ => Err(BindError::NotComposite(id)),
        }
    }

    fn sibling_definition(&self, id: NodeId, target: &str) -> Option<ValidatorDefinition> {
        let table = self.owner_table(self.nodes.get(&id)?.owner)?;
        let key = ChildKey::Name(target.to_string());
        match table.child(&key) {
            Some(sibling) => self.nodes.get(&sibling).map(|n| n.definition.clone()),
            None => table.prototype(&key).map(|p| (*p).clone()),
        }
    }

    fn sibling_value(&self, id: NodeId, target: &str) -> Option<Value> {
        let table = self.owner_table(self.nodes.get(&id)?.owner)?;
        let sibling = table.child(&ChildKey::Name(target.to_string()))?;
        self.nodes.get(&sibling).map(|n| n.value.clone())
    }

    /// Current value of a composite built from its children. Children
    /// without a value show as `Null`.
    fn snapshot(&self, id: NodeId) -> BindResult<Value> {
        let node = self.get(id)?;
        let child_value = |child: NodeId| match self.nodes.get(&child).map(|n| &n.value) {
            Some(Value::Undefined) | None => Value::Null,
            Some(value) => value.clone(),
        };
        Ok(match &node.children {
            Some(Children::Fields(table)) => Value::Map(
                table
                    .live_children()
                    .into_iter()
                    .map(|(key, child)| (key.to_string(), child_value(child)))
                    .collect(),
            ),
            Some(Children::Elements(table)) => {
                Value::List(table.ids().iter().map(|child| child_value(*child)).collect())
            }
            Some(Children::Options(table)) => table
                .selected()
                .and_then(|(_, child)| self.nodes.get(&child))
                .map(|n| n.value.clone())
                .unwrap_or_default(),
            None => node.value.clone(),
        })
    }

    /// Re-sync composite snapshots from `owner` up to the root.
    fn refresh_from(&mut self, mut owner: OwnerRef) {
        while let OwnerRef::Node(parent) = owner {
            let Ok(snapshot) = self.snapshot(parent) else {
                break;
            };
            let Some(node) = self.nodes.get_mut(&parent) else {
                break;
            };
            if !node.value.is_undefined() {
                node.value = snapshot;
            }
            owner = node.owner;
        }
    }

    /// Rebuild a composite's value from its children, then its ancestors'.
    pub(crate) fn resync(&mut self, id: NodeId) -> BindResult<()> {
        let snapshot = self.snapshot(id)?;
        let node = self.get_mut(id)?;
        node.value = snapshot;
        let owner = node.owner;
        self.refresh_from(owner);
        Ok(())
    }

    /// Live view over the value of a map binding.
    pub fn map_value(&mut self, id: NodeId) -> BindResult<MapValue<'_>> {
        MapValue::new(self, id)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check a binding and, for composites, every child.
    ///
    /// Requiredness and rules are evaluated here, never during processing.
    /// Errors found are appended to the bindings that own them.
    pub fn is_valid(&mut self, id: NodeId) -> BindResult<bool> {
        let (def, raw_absent, value, has_errors) = {
            let node = self.get(id)?;
            (
                node.definition.clone(),
                node.raw_value.is_absent(),
                node.value.clone(),
                !node.errors.is_empty(),
            )
        };
        if has_errors {
            return Ok(false);
        }
        if raw_absent {
            if def.optional {
                return Ok(true);
            }
            let error = render_error(&def, FieldError::validation("required_error"));
            self.get_mut(id)?.errors.push(error);
            return Ok(false);
        }

        let own = match &def.kind {
            Kind::EqualTo { target } => {
                let other = self.sibling_value(id, target).unwrap_or(Value::Undefined);
                if other == value {
                    check(&def, &value)
                } else {
                    Err(FieldError::validation("not_equal"))
                }
            }
            _ => check(&def, &value),
        };
        if let Err(error) = own {
            let error = render_error(&def, error);
            self.get_mut(id)?.errors.push(error);
            return Ok(false);
        }

        if let Kind::AnyOf { .. } = &def.kind {
            return self.validate_any_of(id, &def);
        }
        if def.kind.is_composite() {
            let mut all_valid = true;
            for (_, child) in self.children(id)? {
                if !self.is_valid(child)? {
                    all_valid = false;
                }
            }
            if !all_valid {
                let error = render_error(&def, FieldError::validation("inner_validator_error"));
                self.get_mut(id)?.errors.push(error);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The selected alternative is validated first; when it fails, later
    /// alternatives are re-processed with the same input and tried in turn.
    fn validate_any_of(&mut self, id: NodeId, def: &ValidatorDefinition) -> BindResult<bool> {
        let (start, count, selected) = match self.get(id)?.children.as_ref() {
            Some(Children::Options(table)) => (
                table.current().unwrap_or(0),
                table.len(),
                table.selected().map(|(_, child)| child),
            ),
            _ => return Err(BindError::NotComposite(id)),
        };
        let input = match selected {
            Some(child) => self.get(child)?.raw_value.clone(),
            None => self.get(id)?.raw_value.clone(),
        };

        let owner = OwnerRef::Node(id);
        for index in start..count {
            let child = self.rebind(owner, ChildKey::Index(index))?;
            if Some(child) != selected {
                self.process_node(child, input.clone())?;
            }
            if self.get(child)?.holds_value() && self.is_valid(child)? {
                if Some(child) != selected {
                    debug!("Falling back to alternative {} of {}", index, id);
                    self.select_option(id, Some(index))?;
                    self.resync(id)?;
                }
                return Ok(true);
            }
        }
        let error = render_error(def, FieldError::validation("inner_validator_error"));
        self.get_mut(id)?.errors.push(error);
        Ok(false)
    }

    /// Errors of every root field and its descendants, by path.
    pub fn report(&self) -> ValidationReport {
        let mut report = ValidationReport::new();
        for (key, id) in self.root.live_children() {
            self.collect(id, ErrorPath::root().join(key), &mut report);
        }
        report
    }

    /// Errors of one binding and its descendants, relative to it.
    pub fn report_for(&self, id: NodeId) -> BindResult<ValidationReport> {
        self.get(id)?;
        let mut report = ValidationReport::new();
        self.collect(id, ErrorPath::root(), &mut report);
        Ok(report)
    }

    fn collect(&self, id: NodeId, path: ErrorPath, report: &mut ValidationReport) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        for error in &node.errors {
            report.add_error(path.clone(), error.clone());
        }
        let reported = match &node.children {
            Some(Children::Options(table)) => match table.selected() {
                Some(selected) => vec![selected],
                None => table.live_children(),
            },
            Some(children) => children.live_children(),
            None => Vec::new(),
        };
        for (key, child) in reported {
            self.collect(child, path.join(key), report);
        }
    }
}

// ============================================================================
// Pipeline stages
// ============================================================================

fn render_all(def: &ValidatorDefinition, errors: Vec<FieldError>) -> Vec<FieldError> {
    errors.into_iter().map(|e| render_error(def, e)).collect()
}

fn conversion_error(value: Value, target: &ValueType) -> FieldError {
    FieldError::conversion("conversion_error")
        .with_param("value", value)
        .with_param("target", target.display_name())
}

/// Run one pipeline event on `value`. Hook failures become rendered
/// validation errors.
fn run_hook(
    def: &ValidatorDefinition,
    hooks: &BoundHooks,
    event: &str,
    key: &str,
    value: Value,
) -> Result<Value, FieldError> {
    let args = EventArgs::new().with_arg(value).with_named("key", key);
    pipeline(hooks, event, &Carry::Position(0), args).map_err(|e| {
        let hook = match e {
            EventError::Hook(hook) => hook,
            other => HookError::new("hook_error").with_param("error", other.to_string()),
        };
        let error = FieldError {
            params: hook.params,
            ..FieldError::validation(hook.message_id)
        };
        render_error(def, error)
    })
}

/// Absent input stops with `Undefined`. Input already of the target type
/// skips prevalidation and conversion.
fn run_stages<F>(
    def: &ValidatorDefinition,
    hooks: &BoundHooks,
    key: &str,
    input: Value,
    convert: F,
) -> Outcome
where
    F: FnOnce(Value) -> Result<Value, Vec<FieldError>>,
{
    if input.is_absent() {
        return Outcome::ok(Value::Undefined);
    }
    let converted = !matches!(def.kind, Kind::Password(_))
        && def
            .kind
            .target_type()
            .is_some_and(|target| target.matches(&input));

    let mut value = input;
    if !converted {
        value = match run_hook(def, hooks, PREVALIDATE, key, value) {
            Ok(value) => value,
            Err(e) => return Outcome::failed(vec![e]),
        };
        if value.is_absent() {
            return Outcome::ok(Value::Undefined);
        }
        trace!("Converting '{}' from {}", key, value.type_name());
        value = match convert(value) {
            Ok(value) => value,
            Err(errors) => return Outcome::failed(errors),
        };
    }
    match run_hook(def, hooks, POSTVALIDATE, key, value) {
        Ok(value) => Outcome::ok(value),
        Err(e) => Outcome::failed(vec![e]),
    }
}

/// Composite values stay views of their children, so postvalidate hooks
/// may reject them but not replace them.
fn check_composite(
    def: &ValidatorDefinition,
    hooks: &BoundHooks,
    key: &str,
    snapshot: Value,
    mut errors: Vec<FieldError>,
) -> Outcome {
    if errors.is_empty() {
        if let Err(e) = run_hook(def, hooks, POSTVALIDATE, key, snapshot.clone()) {
            errors.push(e);
        }
    }
    Outcome {
        value: snapshot,
        errors,
    }
}

/// List elements are bound while processing, so a definition that could
/// not bind under an element table is rejected when the list is bound.
fn check_bindable(
    def: &ValidatorDefinition,
    siblings: Option<&IndexMap<String, ValidatorRef>>,
) -> BindResult<()> {
    match &def.kind {
        Kind::EqualTo { target } => match siblings {
            Some(fields) if fields.contains_key(target) => Ok(()),
            _ => Err(BindError::UnknownSibling {
                key: target.clone(),
            }),
        },
        Kind::List { element } => check_bindable(element, None),
        Kind::AnyOf { options } => options.iter().try_for_each(|o| check_bindable(o, None)),
        Kind::Map { fields, .. } => fields
            .values()
            .try_for_each(|field| check_bindable(field, Some(fields))),
        _ => Ok(()),
    }
}

/// Length bounds apply to the plaintext; the stored value is the digest.
fn convert_password(
    def: &ValidatorDefinition,
    algorithm: HashAlgorithm,
    value: Value,
) -> Result<Value, Vec<FieldError>> {
    let plain = convert_scalar(&ValueType::String, &value).map_err(|e| vec![render_error(def, e)])?;
    if let Some(rule) = length_rule(def) {
        rule.validate(&plain).map_err(|e| vec![render_error(def, e)])?;
    }
    let text = plain.as_str().unwrap_or_default();
    Ok(Value::String(hash_password(text, algorithm)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::event::{add_listener, get_listeners, listener};
    use std::sync::Arc;

    fn tree_with(fields: Vec<(&str, ValidatorDefinition)>) -> (BindingTree, IndexMap<String, NodeId>) {
        let prototypes: IndexMap<String, ValidatorRef> = fields
            .into_iter()
            .map(|(name, def)| (name.to_string(), Arc::new(def.with_key(name))))
            .collect();
        let names: Vec<String> = prototypes.keys().cloned().collect();
        let mut tree = BindingTree::new(prototypes);
        let ids = names
            .into_iter()
            .map(|name| {
                let id = tree.bind(OwnerRef::Root, ChildKey::Name(name.clone())).unwrap();
                (name, id)
            })
            .collect();
        (tree, ids)
    }

    fn ids_of(errors: &[FieldError]) -> Vec<&str> {
        errors.iter().map(|e| e.message_id.as_str()).collect()
    }

    #[test]
    fn test_bind_twice_fails() {
        let (mut tree, _) = tree_with(vec![("age", ValidatorDefinition::integer())]);
        let err = tree.bind(OwnerRef::Root, "age".into()).unwrap_err();
        assert_eq!(err, BindError::AlreadyBound { key: "age".into() });
    }

    #[test]
    fn test_unbind_then_operations_fail_fast() {
        let (mut tree, ids) = tree_with(vec![("age", ValidatorDefinition::integer())]);
        let id = ids["age"];
        tree.unbind(id).unwrap();
        assert_eq!(tree.unbind(id), Err(BindError::NotBound(id)));
        assert_eq!(tree.process(id, "1".into()), Err(BindError::NotBound(id)));
        assert!(tree.child(OwnerRef::Root, &"age".into()).is_none());

        let fresh = tree.rebind(OwnerRef::Root, "age".into()).unwrap();
        assert_ne!(fresh, id);
        assert!(tree.get(fresh).unwrap().errors().is_empty());
    }

    #[test]
    fn test_bound_options_are_isolated() {
        let prototype = Arc::new(ValidatorDefinition::integer().max_value(10i64));
        let mut tree = BindingTree::detached();
        let a = tree.bind_detached(prototype.clone()).unwrap();
        let b = tree.bind_detached(prototype.clone()).unwrap();

        tree.get_mut(a).unwrap().options_mut().bounds.max_value = Some(Value::Integer(100));
        tree.process(a, "50".into()).unwrap();
        tree.process(b, "50".into()).unwrap();

        assert!(tree.is_valid(a).unwrap());
        assert!(!tree.is_valid(b).unwrap());
        assert_eq!(prototype.bounds.max_value, Some(Value::Integer(10)));
    }

    #[test]
    fn test_conversion_failure_sets_undefined() {
        let (mut tree, ids) = tree_with(vec![("age", ValidatorDefinition::integer())]);
        let id = ids["age"];
        tree.process(id, "abc".into()).unwrap();
        let node = tree.get(id).unwrap();
        assert_eq!(node.value(), &Value::Undefined);
        assert_eq!(node.raw_value(), &Value::from("abc"));
        assert_eq!(node.errors()[0].kind, ErrorKind::Conversion);
        assert_eq!(node.errors()[0].message, "Unable to convert 'abc' to integer object");
        assert!(!tree.is_valid(id).unwrap());
        // Rules are skipped once conversion failed.
        assert_eq!(tree.get(id).unwrap().errors().len(), 1);
    }

    #[test]
    fn test_absent_input_is_not_an_error() {
        let (mut tree, ids) = tree_with(vec![("age", ValidatorDefinition::integer())]);
        tree.process(ids["age"], Value::Null).unwrap();
        let node = tree.get(ids["age"]).unwrap();
        assert_eq!(node.value(), &Value::Undefined);
        assert!(node.errors().is_empty());
    }

    #[test]
    fn test_required_error_only_once() {
        let (mut tree, ids) = tree_with(vec![("age", ValidatorDefinition::integer())]);
        let id = ids["age"];
        assert!(!tree.is_valid(id).unwrap());
        assert!(!tree.is_valid(id).unwrap());
        assert_eq!(ids_of(tree.get(id).unwrap().errors()), vec!["required_error"]);
    }

    #[test]
    fn test_optional_absent_is_valid() {
        let (mut tree, ids) = tree_with(vec![("age", ValidatorDefinition::integer().optional())]);
        assert!(tree.is_valid(ids["age"]).unwrap());
    }

    #[test]
    fn test_boolean_is_never_required() {
        let (mut tree, ids) = tree_with(vec![("flag", ValidatorDefinition::boolean())]);
        let id = ids["flag"];
        assert_eq!(tree.get(id).unwrap().value(), &Value::Boolean(false));
        assert!(tree.is_valid(id).unwrap());
    }

    #[test]
    fn test_prevalidate_hook_transforms_raw_input() {
        let def = ValidatorDefinition::integer();
        add_listener(
            &def,
            PREVALIDATE,
            listener(|args| Ok(Value::String(args.value().to_string().replace(' ', "")))),
        )
        .unwrap();
        let (mut tree, ids) = tree_with(vec![("n", def)]);
        tree.process(ids["n"], "1 000".into()).unwrap();
        assert_eq!(tree.get(ids["n"]).unwrap().value(), &Value::Integer(1000));
    }

    #[test]
    fn test_postvalidate_failure_is_captured() {
        let def = ValidatorDefinition::integer();
        add_listener(
            &def,
            POSTVALIDATE,
            listener(|args| match args.value().as_integer() {
                Some(n) if n % 2 == 0 => Ok(args.value().clone()),
                _ => Err(HookError::new("odd_number")),
            }),
        )
        .unwrap();
        let def = def.with_message("odd_number", "Even numbers only");
        let (mut tree, ids) = tree_with(vec![("n", def)]);
        let id = ids["n"];

        tree.process(id, "3".into()).unwrap();
        let node = tree.get(id).unwrap();
        assert_eq!(node.value(), &Value::Undefined);
        assert_eq!(node.errors()[0].kind, ErrorKind::Validation);
        assert_eq!(node.errors()[0].message, "Even numbers only");

        tree.process(id, "4".into()).unwrap();
        assert_eq!(tree.get(id).unwrap().value(), &Value::Integer(4));
    }

    #[test]
    fn test_bound_listeners_do_not_reach_prototype() {
        let (mut tree, ids) = tree_with(vec![("n", ValidatorDefinition::integer())]);
        let id = ids["n"];
        add_listener(
            tree.get(id).unwrap(),
            POSTVALIDATE,
            listener(|args| Ok(Value::Integer(args.value().as_integer().unwrap_or(0) * 2))),
        )
        .unwrap();
        tree.process(id, "21".into()).unwrap();
        assert_eq!(tree.get(id).unwrap().value(), &Value::Integer(42));
        assert!(get_listeners(tree.get(id).unwrap().prototype().as_ref(), POSTVALIDATE)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_bind_hooks_reach_existing_and_future_bindings() {
        let (mut tree, ids) = tree_with(vec![
            ("a", ValidatorDefinition::string()),
            ("b", ValidatorDefinition::integer()),
        ]);
        tree.add_bind_hook(
            Selector::Kind(KindTag::String),
            PREVALIDATE,
            listener(|args| Ok(Value::String(args.value().to_string().to_uppercase()))),
        );
        tree.process(ids["a"], Value::Integer(7)).unwrap();
        assert_eq!(tree.get(ids["a"]).unwrap().value(), &Value::from("7"));

        tree.add_bind_hook(
            Selector::Key("b".to_string()),
            POSTVALIDATE,
            listener(|_| Ok(Value::Integer(0))),
        );
        tree.unbind(ids["b"]).unwrap();
        let b = tree.rebind(OwnerRef::Root, "b".into()).unwrap();
        tree.process(b, "5".into()).unwrap();
        assert_eq!(tree.get(b).unwrap().value(), &Value::Integer(0));
    }

    #[test]
    fn test_list_positions_and_summary_error() {
        let element = ValidatorDefinition::integer().min_value(2i64).max_value(3i64);
        let (mut tree, ids) = tree_with(vec![("items", ValidatorDefinition::list(element))]);
        let id = ids["items"];
        tree.process(id, Value::from(vec![1i64, 2, 3, 4])).unwrap();

        assert_eq!(tree.get(id).unwrap().value(), &Value::from(vec![1i64, 2, 3, 4]));
        assert!(!tree.is_valid(id).unwrap());
        assert_eq!(ids_of(tree.get(id).unwrap().errors()), vec!["inner_validator_error"]);

        let report = tree.report();
        let failing: Vec<String> = report
            .errors
            .iter()
            .filter(|e| e.error.message_id == "value_out_of_range")
            .map(|e| e.path.to_string())
            .collect();
        assert_eq!(failing, vec!["items[0]", "items[3]"]);
    }

    #[test]
    fn test_list_explodes_strings() {
        let (mut tree, ids) = tree_with(vec![("items", ValidatorDefinition::list(ValidatorDefinition::integer()))]);
        let id = ids["items"];
        tree.process(id, "1a2b".into()).unwrap();
        assert_eq!(
            tree.get(id).unwrap().value(),
            &Value::List(vec![Value::Integer(1), Value::Null, Value::Integer(2), Value::Null])
        );
        let second = tree.element(id, 1).unwrap();
        assert_eq!(tree.get(second).unwrap().errors()[0].message_id, "conversion_error");
        assert_eq!(
            tree.element(id, 9),
            Err(BindError::IndexOutOfRange { index: 9, len: 4 })
        );
    }

    #[test]
    fn test_list_coercions() {
        let (mut tree, ids) = tree_with(vec![("items", ValidatorDefinition::list(ValidatorDefinition::integer()))]);
        let id = ids["items"];

        tree.process(id, Value::Integer(5)).unwrap();
        assert_eq!(tree.get(id).unwrap().value(), &Value::from(vec![5i64]));

        let mut map = IndexMap::new();
        map.insert("a".to_string(), Value::Integer(1));
        tree.process(id, Value::Map(map)).unwrap();
        assert_eq!(tree.get(id).unwrap().value(), &Value::Undefined);
        assert_eq!(tree.get(id).unwrap().errors()[0].kind, ErrorKind::Conversion);
        assert_eq!(tree.children(id).unwrap().len(), 0);
    }

    #[test]
    fn test_list_reprocess_replaces_children() {
        let (mut tree, ids) = tree_with(vec![("items", ValidatorDefinition::list(ValidatorDefinition::integer()))]);
        let id = ids["items"];
        tree.process(id, Value::from(vec![1i64, 2, 3])).unwrap();
        let old = tree.element(id, 0).unwrap();
        tree.process(id, Value::from(vec![9i64])).unwrap();
        assert!(!tree.contains(old));
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get(id).unwrap().value(), &Value::from(vec![9i64]));
    }

    #[test]
    fn test_list_length_bounds() {
        let list = ValidatorDefinition::list(ValidatorDefinition::integer()).min_length(2);
        let (mut tree, ids) = tree_with(vec![("items", list)]);
        tree.process(ids["items"], Value::from(vec![1i64])).unwrap();
        assert!(!tree.is_valid(ids["items"]).unwrap());
        assert_eq!(
            tree.get(ids["items"]).unwrap().errors()[0].message,
            "Expecting at least 2 elements"
        );
    }

    #[test]
    fn test_unbinding_list_element_rekeys_siblings() {
        let (mut tree, ids) = tree_with(vec![("items", ValidatorDefinition::list(ValidatorDefinition::integer()))]);
        let id = ids["items"];
        tree.process(id, Value::from(vec![1i64, 2, 3])).unwrap();
        let first = tree.element(id, 0).unwrap();
        tree.unbind(first).unwrap();
        let now_first = tree.element(id, 0).unwrap();
        assert_eq!(tree.get(now_first).unwrap().key(), &ChildKey::Index(0));
        assert_eq!(tree.get(id).unwrap().value(), &Value::from(vec![2i64, 3]));
        assert_eq!(tree.path(now_first).unwrap().to_string(), "items[0]");
    }

    fn pair() -> ValidatorDefinition {
        ValidatorDefinition::map([
            ("a", ValidatorDefinition::integer()),
            ("b", ValidatorDefinition::integer()),
        ])
    }

    #[test]
    fn test_map_default_value_has_every_field() {
        let (tree, ids) = tree_with(vec![("m", pair())]);
        let value = tree.get(ids["m"]).unwrap().value().clone();
        assert_eq!(value, [("a", Value::Null), ("b", Value::Null)].into_iter().collect());
    }

    #[test]
    fn test_map_absent_input_leaves_value_undefined() {
        let (mut tree, ids) = tree_with(vec![("m", pair())]);
        let id = ids["m"];
        tree.process(id, [("a", "1"), ("b", "2")].into_iter().collect()).unwrap();

        tree.process(id, Value::Undefined).unwrap();
        assert_eq!(tree.get(id).unwrap().value(), &Value::Undefined);
        assert!(tree.get(id).unwrap().errors().is_empty());
        tree.process(id, Value::Null).unwrap();
        assert_eq!(tree.get(id).unwrap().value(), &Value::Undefined);

        assert!(!tree.is_valid(id).unwrap());
        assert_eq!(ids_of(tree.get(id).unwrap().errors()), vec!["required_error"]);
    }

    #[test]
    fn test_map_required_children_report_by_name() {
        let (mut tree, ids) = tree_with(vec![("m", pair())]);
        let id = ids["m"];
        tree.process(id, Value::Map(IndexMap::new())).unwrap();
        assert!(!tree.is_valid(id).unwrap());

        let report = tree.report_for(id).unwrap();
        let required: Vec<String> = report
            .errors
            .iter()
            .filter(|e| e.error.message_id == "required_error")
            .map(|e| e.path.to_string())
            .collect();
        assert_eq!(required, vec!["a", "b"]);
        assert_eq!(ids_of(tree.get(id).unwrap().errors()), vec!["inner_validator_error"]);
    }

    #[test]
    fn test_map_strict_rejects_unknown_keys() {
        let (mut tree, ids) = tree_with(vec![("m", pair())]);
        let id = ids["m"];
        let input: Value = [("a", "1"), ("zzz", "2")].into_iter().collect();
        tree.process(id, input).unwrap();
        let node = tree.get(id).unwrap();
        assert_eq!(ids_of(node.errors()), vec!["unknown_key"]);
        assert_eq!(node.errors()[0].message, "Unexpected key 'zzz'");
    }

    #[test]
    fn test_map_lenient_drops_unknown_keys() {
        let (mut tree, ids) = tree_with(vec![("m", pair().strict(false))]);
        let id = ids["m"];
        let input: Value = [("a", "1"), ("b", "2"), ("zzz", "3")].into_iter().collect();
        tree.process(id, input).unwrap();
        assert!(tree.is_valid(id).unwrap());
        assert_eq!(
            tree.get(id).unwrap().value(),
            &[("a", 1i64), ("b", 2)].into_iter().collect::<Value>()
        );
    }

    #[test]
    fn test_map_non_map_input() {
        let (mut tree, ids) = tree_with(vec![("m", pair())]);
        tree.process(ids["m"], "abc".into()).unwrap();
        let node = tree.get(ids["m"]).unwrap();
        assert_eq!(node.value(), &Value::Undefined);
        assert_eq!(node.errors().len(), 1);
        assert_eq!(node.errors()[0].kind, ErrorKind::Conversion);
    }

    #[test]
    fn test_map_missing_children_get_defaults() {
        let map = ValidatorDefinition::map([
            ("a", ValidatorDefinition::integer()),
            ("b", ValidatorDefinition::integer().with_default(7i64)),
        ]);
        let (mut tree, ids) = tree_with(vec![("m", map)]);
        let id = ids["m"];
        tree.process(id, [("a", "1"), ("b", "2")].into_iter().collect()).unwrap();
        tree.process(id, [("a", "5")].into_iter().collect()).unwrap();
        assert_eq!(
            tree.get(id).unwrap().value(),
            &[("a", 5i64), ("b", 7)].into_iter().collect::<Value>()
        );
    }

    #[test]
    fn test_map_rebinds_removed_child() {
        let (mut tree, ids) = tree_with(vec![("m", pair())]);
        let id = ids["m"];
        let a = tree.field(id, "a").unwrap().unwrap();
        tree.unbind(a).unwrap();
        assert_eq!(tree.field(id, "a").unwrap(), None);

        tree.process(id, [("a", "1"), ("b", "2")].into_iter().collect()).unwrap();
        let fresh = tree.field(id, "a").unwrap().unwrap();
        assert_ne!(fresh, a);
        assert_eq!(tree.get(fresh).unwrap().value(), &Value::Integer(1));
    }

    #[test]
    fn test_nested_child_update_refreshes_ancestors() {
        let outer = ValidatorDefinition::map([("inner", pair())]);
        let (mut tree, ids) = tree_with(vec![("m", outer)]);
        let id = ids["m"];
        let inner = tree.field(id, "inner").unwrap().unwrap();
        let a = tree.field(inner, "a").unwrap().unwrap();
        tree.process(a, "3".into()).unwrap();

        let expected: Value = [(
            "inner",
            [("a", Value::Integer(3)), ("b", Value::Null)]
                .into_iter()
                .collect::<Value>(),
        )]
        .into_iter()
        .collect();
        assert_eq!(tree.get(id).unwrap().value(), &expected);
        assert_eq!(tree.path(a).unwrap().to_string(), "m.inner.a");
    }

    #[test]
    fn test_equal_to_requires_owner() {
        let mut tree = BindingTree::detached();
        let err = tree
            .bind_detached(Arc::new(ValidatorDefinition::equal_to("password")))
            .unwrap_err();
        assert_eq!(err, BindError::OwnerRequired { kind: "EqualTo".to_string() });
    }

    #[test]
    fn test_equal_to_requires_known_sibling() {
        let map = ValidatorDefinition::map([("confirm", ValidatorDefinition::equal_to("missing"))]);
        let mut tree = BindingTree::new(
            [("m".to_string(), Arc::new(map))].into_iter().collect(),
        );
        let err = tree.bind(OwnerRef::Root, "m".into()).unwrap_err();
        assert_eq!(err, BindError::UnknownSibling { key: "missing".to_string() });
    }

    #[test]
    fn test_list_of_equal_to_rejected_at_bind() {
        let prototypes: IndexMap<String, ValidatorRef> = [
            ("x".to_string(), Arc::new(ValidatorDefinition::integer())),
            (
                "copies".to_string(),
                Arc::new(ValidatorDefinition::list(ValidatorDefinition::equal_to("x"))),
            ),
        ]
        .into_iter()
        .collect();
        let mut tree = BindingTree::new(prototypes);
        tree.bind(OwnerRef::Root, "x".into()).unwrap();
        let err = tree.bind(OwnerRef::Root, "copies".into()).unwrap_err();
        assert_eq!(err, BindError::UnknownSibling { key: "x".to_string() });

        let nested = ValidatorDefinition::list(ValidatorDefinition::list(ValidatorDefinition::equal_to("x")));
        assert!(matches!(
            BindingTree::detached().bind_detached(Arc::new(nested)),
            Err(BindError::UnknownSibling { .. })
        ));
    }

    #[test]
    fn test_list_of_maps_with_equal_to_processes() {
        let row = ValidatorDefinition::map([
            ("a", ValidatorDefinition::integer()),
            ("b", ValidatorDefinition::equal_to("a")),
        ]);
        let (mut tree, ids) = tree_with(vec![("rows", ValidatorDefinition::list(row))]);
        let id = ids["rows"];
        let rows = Value::List(vec![
            [("a", "1"), ("b", "1")].into_iter().collect(),
            [("a", "2"), ("b", "3")].into_iter().collect(),
        ]);
        tree.process(id, rows).unwrap();
        assert!(!tree.is_valid(id).unwrap());
        let report = tree.report();
        let failing: Vec<String> = report
            .errors
            .iter()
            .filter(|e| e.error.message_id == "not_equal")
            .map(|e| e.path.to_string())
            .collect();
        assert_eq!(failing, vec!["rows[1].b"]);
    }

    #[test]
    fn test_equal_to_uses_sibling_conversion_and_messages() {
        let (mut tree, ids) = tree_with(vec![
            ("when", ValidatorDefinition::datetime("%Y-%m-%d")),
            ("again", ValidatorDefinition::equal_to("when")),
        ]);
        tree.process(ids["when"], "2024-01-05".into()).unwrap();

        tree.process(ids["again"], "05/01/2024".into()).unwrap();
        let again = tree.get(ids["again"]).unwrap();
        assert_eq!(again.errors()[0].message, "Input date/time does not match format %Y-%m-%d");

        tree.process(ids["again"], "2024-01-06".into()).unwrap();
        assert!(!tree.is_valid(ids["again"]).unwrap());
        assert_eq!(tree.get(ids["again"]).unwrap().errors()[0].message, "Values are not equal");

        tree.process(ids["again"], "2024-01-05".into()).unwrap();
        assert!(tree.is_valid(ids["again"]).unwrap());
    }

    #[test]
    fn test_password_length_checked_before_hashing() {
        let (mut tree, ids) = tree_with(vec![("pw", ValidatorDefinition::password().min_length(4))]);
        let id = ids["pw"];
        tree.process(id, "abc".into()).unwrap();
        let node = tree.get(id).unwrap();
        assert_eq!(node.value(), &Value::Undefined);
        assert_eq!(node.errors()[0].message, "Expecting at least 4 characters");

        tree.process(id, "abcd".into()).unwrap();
        assert_eq!(
            tree.get(id).unwrap().value(),
            &Value::String(hash_password("abcd", HashAlgorithm::Sha256))
        );
        assert!(tree.is_valid(id).unwrap());
    }

    #[test]
    fn test_processed_and_unbind_events() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let processed = Arc::new(AtomicUsize::new(0));
        let unbound = Arc::new(AtomicUsize::new(0));
        let def = ValidatorDefinition::integer();
        let p = processed.clone();
        add_listener(
            &def,
            PROCESSED,
            listener(move |_| {
                p.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Undefined)
            }),
        )
        .unwrap();
        let u = unbound.clone();
        add_listener(
            &def,
            UNBIND,
            listener(move |_| {
                u.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Undefined)
            }),
        )
        .unwrap();

        let (mut tree, ids) = tree_with(vec![("n", def)]);
        tree.process(ids["n"], "1".into()).unwrap();
        tree.process(ids["n"], "2".into()).unwrap();
        tree.unbind(ids["n"]).unwrap();
        assert_eq!(processed.load(Ordering::SeqCst), 2);
        assert_eq!(unbound.load(Ordering::SeqCst), 1);
    }

    fn int_or_string() -> ValidatorDefinition {
        ValidatorDefinition::any_of([
            ValidatorDefinition::integer().max_value(10i64),
            ValidatorDefinition::string(),
        ])
    }

    #[test]
    fn test_any_of_selects_first_converting_option() {
        let (mut tree, ids) = tree_with(vec![("v", int_or_string())]);
        let id = ids["v"];
        tree.process(id, "7".into()).unwrap();
        assert_eq!(tree.get(id).unwrap().value(), &Value::Integer(7));
        let first = tree.child(OwnerRef::Node(id), &ChildKey::Index(0));
        assert_eq!(tree.selected_option(id).unwrap(), first);
        assert!(tree.is_valid(id).unwrap());

        tree.process(id, "abc".into()).unwrap();
        assert_eq!(tree.get(id).unwrap().value(), &Value::from("abc"));
        assert!(tree.is_valid(id).unwrap());
        assert!(tree.report().success);
    }

    #[test]
    fn test_any_of_falls_back_when_validation_fails() {
        let (mut tree, ids) = tree_with(vec![("v", int_or_string())]);
        let id = ids["v"];
        tree.process(id, "50".into()).unwrap();
        assert_eq!(tree.get(id).unwrap().value(), &Value::Integer(50));

        assert!(tree.is_valid(id).unwrap());
        assert_eq!(tree.get(id).unwrap().value(), &Value::from("50"));
        let second = tree.child(OwnerRef::Node(id), &ChildKey::Index(1));
        assert_eq!(tree.selected_option(id).unwrap(), second);
        assert!(tree.report().success);
    }

    #[test]
    fn test_any_of_reports_selected_option_when_all_fail() {
        let def = ValidatorDefinition::any_of([
            ValidatorDefinition::integer().max_value(10i64),
            ValidatorDefinition::integer().min_value(100i64),
        ]);
        let (mut tree, ids) = tree_with(vec![("v", def)]);
        let id = ids["v"];
        tree.process(id, "50".into()).unwrap();
        assert!(!tree.is_valid(id).unwrap());
        assert!(!tree.is_valid(id).unwrap());

        let report = tree.report();
        let paths: Vec<String> = report.errors.iter().map(|e| e.path.to_string()).collect();
        assert_eq!(paths, vec!["v", "v[0]"]);
        assert_eq!(report.errors[0].error.message, "Value is not valid for any of the alternatives");
        assert_eq!(report.errors[1].error.message, "Expecting value less or equal to 10");
    }

    #[test]
    fn test_any_of_without_matching_option() {
        let def = ValidatorDefinition::any_of([
            ValidatorDefinition::integer(),
            ValidatorDefinition::datetime("%Y-%m-%d"),
        ]);
        let (mut tree, ids) = tree_with(vec![("v", def)]);
        let id = ids["v"];
        tree.process(id, "soon".into()).unwrap();
        let node = tree.get(id).unwrap();
        assert_eq!(node.value(), &Value::Undefined);
        assert_eq!(ids_of(node.errors()), vec!["no_matching_option"]);
        assert_eq!(node.errors()[0].kind, ErrorKind::Conversion);
        assert_eq!(tree.selected_option(id).unwrap(), None);

        tree.process(id, Value::Null).unwrap();
        assert_eq!(tree.get(id).unwrap().value(), &Value::Undefined);
        assert!(tree.get(id).unwrap().errors().is_empty());
    }

    #[test]
    fn test_any_of_inside_map_refreshes_snapshot() {
        let map = ValidatorDefinition::map([("v", int_or_string())]);
        let (mut tree, ids) = tree_with(vec![("m", map)]);
        let id = ids["m"];
        tree.process(id, [("v", "50")].into_iter().collect()).unwrap();
        assert_eq!(
            tree.get(id).unwrap().value(),
            &[("v", 50i64)].into_iter().collect::<Value>()
        );
        assert!(tree.is_valid(id).unwrap());
        assert_eq!(
            tree.get(id).unwrap().value(),
            &[("v", "50")].into_iter().collect::<Value>()
        );
    }

    #[test]
    fn test_isbn_field() {
        let (mut tree, ids) = tree_with(vec![("isbn", ValidatorDefinition::isbn())]);
        let id = ids["isbn"];
        tree.process(id, "9780306406157".into()).unwrap();
        assert!(tree.is_valid(id).unwrap());

        tree.process(id, "9780306406158".into()).unwrap();
        assert!(!tree.is_valid(id).unwrap());
        assert_eq!(
            tree.get(id).unwrap().errors()[0].message,
            "ISBN checksum verification failed"
        );
    }
}
