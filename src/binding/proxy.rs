//! Live view over a map binding's value.

use crate::binding::owner::{Children, OwnerRef};
use crate::binding::tree::BindingTree;
use crate::core::error::{BindError, BindResult, ChildKey, NodeId};
use crate::core::types::Value;
use serde::{Serialize, Serializer};
use std::fmt;

/// Reads go to the current child values; writes reprocess the child.
pub struct MapValue<'a> {
    tree: &'a mut BindingTree,
    node: NodeId,
}

impl<'a> MapValue<'a> {
    pub fn new(tree: &'a mut BindingTree, node: NodeId) -> BindResult<Self> {
        if !matches!(tree.get(node)?.children(), Some(Children::Fields(_))) {
            return Err(BindError::NotComposite(node));
        }
        Ok(Self { tree, node })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Current value of the child under `key`; `Undefined` when removed.
    pub fn get(&self, key: &str) -> BindResult<Value> {
        Ok(match self.tree.field(self.node, key)? {
            Some(child) => self.tree.get(child)?.value().clone(),
            None => Value::Undefined,
        })
    }

    /// Process `value` through the child under `key`, re-binding it first
    /// if it was removed.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> BindResult<()> {
        self.tree.field(self.node, key)?;
        let child = self
            .tree
            .rebind(OwnerRef::Node(self.node), ChildKey::Name(key.to_string()))?;
        self.tree.process(child, value.into())?;
        self.tree.resync(self.node)
    }

    /// Declared keys in order.
    pub fn keys(&self) -> Vec<String> {
        match self.tree.get(self.node).ok().and_then(|n| n.children()) {
            Some(Children::Fields(table)) => table.names().map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }

    /// Plain map of the current child values.
    pub fn snapshot(&self) -> Value {
        let entries = self
            .keys()
            .into_iter()
            .filter_map(|key| match self.tree.field(self.node, &key) {
                Ok(Some(child)) => {
                    let value = match self.tree.get(child).map(|n| n.value()) {
                        Ok(Value::Undefined) | Err(_) => Value::Null,
                        Ok(value) => value.clone(),
                    };
                    Some((key, value))
                }
                _ => None,
            })
            .collect();
        Value::Map(entries)
    }
}

impl PartialEq<Value> for MapValue<'_> {
    fn eq(&self, other: &Value) -> bool {
        self.snapshot() == *other
    }
}

impl fmt::Debug for MapValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MapValue").field(&self.snapshot()).finish()
    }
}

impl Serialize for MapValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::definition::{ValidatorDefinition, ValidatorRef};
    use std::sync::Arc;

    fn bound_pair() -> (BindingTree, NodeId) {
        let map = ValidatorDefinition::map([
            ("a", ValidatorDefinition::integer()),
            ("b", ValidatorDefinition::string()),
        ]);
        let prototype: ValidatorRef = Arc::new(map);
        let mut tree = BindingTree::detached();
        let id = tree.bind_detached(prototype).unwrap();
        (tree, id)
    }

    #[test]
    fn test_reads_follow_children() {
        let (mut tree, id) = bound_pair();
        tree.process(id, [("a", "1"), ("b", "x")].into_iter().collect()).unwrap();

        let view = tree.map_value(id).unwrap();
        assert_eq!(view.get("a").unwrap(), Value::Integer(1));
        assert_eq!(view.keys(), vec!["a", "b"]);
        assert!(matches!(view.get("zzz"), Err(BindError::UnknownKey { .. })));
    }

    #[test]
    fn test_writes_reprocess_child() {
        let (mut tree, id) = bound_pair();
        {
            let mut view = tree.map_value(id).unwrap();
            view.set("a", "42").unwrap();
            assert_eq!(view, [("a", Value::Integer(42)), ("b", Value::Null)].into_iter().collect::<Value>());
        }
        assert_eq!(
            tree.get(id).unwrap().value(),
            &[("a", Value::Integer(42)), ("b", Value::Null)].into_iter().collect::<Value>()
        );
    }

    #[test]
    fn test_write_after_remove_rebinds() {
        let (mut tree, id) = bound_pair();
        let a = tree.field(id, "a").unwrap().unwrap();
        tree.unbind(a).unwrap();
        let mut view = tree.map_value(id).unwrap();
        assert_eq!(view.get("a").unwrap(), Value::Undefined);
        view.set("a", 5i64).unwrap();
        assert_eq!(view.get("a").unwrap(), Value::Integer(5));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let (mut tree, id) = bound_pair();
        tree.process(id, [("a", "7"), ("b", "hi")].into_iter().collect()).unwrap();
        let view = tree.map_value(id).unwrap();
        assert_eq!(serde_json::to_string(&view).unwrap(), r#"{"a":7,"b":"hi"}"#);
    }

    #[test]
    fn test_rejects_non_map() {
        let mut tree = BindingTree::detached();
        let id = tree.bind_detached(Arc::new(ValidatorDefinition::integer())).unwrap();
        assert_eq!(tree.map_value(id).unwrap_err(), BindError::NotComposite(id));
    }
}
