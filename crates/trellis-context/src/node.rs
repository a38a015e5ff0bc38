//! Context tree nodes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TemplateError;

/// A deferred context value, invoked only when a template path reaches it.
#[async_trait]
pub trait LazyValue: Send + Sync {
    async fn resolve(&self) -> Result<ContextNode, TemplateError>;
}

/// A node in the context tree.
#[derive(Clone)]
pub enum ContextNode {
    /// A concrete JSON value. Strings may themselves contain template
    /// expressions and are resolved recursively when read.
    Value(Value),
    /// A nested namespace.
    Tree(BTreeMap<String, ContextNode>),
    /// A deferred value, e.g. provider or service outputs.
    Lazy(Arc<dyn LazyValue>),
}

impl ContextNode {
    pub fn tree() -> Self {
        ContextNode::Tree(BTreeMap::new())
    }

    pub fn lazy(value: Arc<dyn LazyValue>) -> Self {
        ContextNode::Lazy(value)
    }

    /// Insert a child under a dotted path, creating intermediate trees.
    ///
    /// Panics if an intermediate key already holds a non-tree node; context
    /// layers are assembled by the process itself, not from user input.
    pub fn set_path(&mut self, path: &str, node: ContextNode) {
        let mut current = self;
        let segments: Vec<&str> = path.split('.').collect();
        for (i, segment) in segments.iter().enumerate() {
            let ContextNode::Tree(map) = current else {
                panic!("context path '{}' crosses a non-tree node", path);
            };
            if i == segments.len() - 1 {
                map.insert(segment.to_string(), node);
                return;
            }
            current = map
                .entry(segment.to_string())
                .or_insert_with(ContextNode::tree);
        }
    }

    pub fn get(&self, key: &str) -> Option<&ContextNode> {
        match self {
            ContextNode::Tree(map) => map.get(key),
            _ => None,
        }
    }
}

impl From<Value> for ContextNode {
    fn from(value: Value) -> Self {
        ContextNode::Value(value)
    }
}

impl From<&str> for ContextNode {
    fn from(value: &str) -> Self {
        ContextNode::Value(Value::String(value.to_string()))
    }
}

impl fmt::Debug for ContextNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextNode::Value(v) => write!(f, "Value({})", v),
            ContextNode::Tree(map) => f.debug_map().entries(map.iter()).finish(),
            ContextNode::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

/// A lazy node backed by an already-computed outputs map.
pub struct StaticOutputs(pub Value);

#[async_trait]
impl LazyValue for StaticOutputs {
    async fn resolve(&self) -> Result<ContextNode, TemplateError> {
        Ok(ContextNode::Value(self.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_path_creates_intermediate_trees() {
        let mut root = ContextNode::tree();
        root.set_path("local.env.HOME", ContextNode::from("/home/dev"));
        root.set_path("local.platform", ContextNode::from("linux"));

        let local = root.get("local").expect("local");
        assert!(local.get("env").is_some());
        match local.get("platform") {
            Some(ContextNode::Value(Value::String(s))) => assert_eq!(s, "linux"),
            other => panic!("unexpected node: {:?}", other),
        }
    }

    #[test]
    fn test_value_nodes_are_not_trees() {
        let node = ContextNode::Value(json!({"a": 1}));
        assert!(node.get("a").is_none());
    }
}
