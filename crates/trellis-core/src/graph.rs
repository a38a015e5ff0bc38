//! The config graph
//!
//! An immutable, typed dependency graph built from fully-resolved modules.
//! Four node kinds exist: `build`, `deploy` (services), `run` (tasks) and
//! `test`. Edges are stored as name-keyed adjacency indices in both
//! directions, so all queries are O(V+E).
//!
//! The graph is validated at construction: unknown dependency references and
//! directed cycles are rejected.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::GraphError;
use crate::types::{Module, ModuleSet};

/// Kind of a config graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Build,
    Deploy,
    Run,
    Test,
}

impl NodeKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            NodeKind::Build => "build",
            NodeKind::Deploy => "deploy",
            NodeKind::Run => "run",
            NodeKind::Test => "test",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Reference to a node by kind and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub name: String,
}

impl NodeRef {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}.{}", self.kind.prefix(), self.name)
    }
}

/// A node in the config graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub kind: NodeKind,
    /// Node name: module name for builds, service/task name for deploys and
    /// runs, `<module>.<name>` for tests.
    pub name: String,
    /// Name of the module this node belongs to.
    pub module_name: String,
}

impl GraphNode {
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.kind, self.name.clone())
    }

    pub fn key(&self) -> String {
        self.node_ref().key()
    }
}

/// The immutable project dependency graph.
#[derive(Debug, Clone)]
pub struct ConfigGraph {
    modules: ModuleSet,
    nodes: BTreeMap<String, GraphNode>,
    dependencies: HashMap<String, BTreeSet<String>>,
    dependants: HashMap<String, BTreeSet<String>>,
    module_nodes: HashMap<String, Vec<String>>,
}

impl ConfigGraph {
    /// Build and validate the graph from a module set.
    pub fn new(modules: ModuleSet) -> Result<Self, GraphError> {
        let mut graph = Self {
            modules,
            nodes: BTreeMap::new(),
            dependencies: HashMap::new(),
            dependants: HashMap::new(),
            module_nodes: HashMap::new(),
        };

        graph.insert_nodes();
        graph.insert_edges()?;
        graph.check_acyclic()?;
        Ok(graph)
    }

    pub fn modules(&self) -> &ModuleSet {
        &self.modules
    }

    fn insert_nodes(&mut self) {
        let mut nodes = Vec::new();
        for module in self.modules.iter() {
            nodes.push(GraphNode {
                kind: NodeKind::Build,
                name: module.name.clone(),
                module_name: module.name.clone(),
            });
            for service in &module.service_configs {
                nodes.push(GraphNode {
                    kind: NodeKind::Deploy,
                    name: service.name.clone(),
                    module_name: module.name.clone(),
                });
            }
            for task in &module.task_configs {
                nodes.push(GraphNode {
                    kind: NodeKind::Run,
                    name: task.name.clone(),
                    module_name: module.name.clone(),
                });
            }
            for test in &module.test_configs {
                nodes.push(GraphNode {
                    kind: NodeKind::Test,
                    name: test.key(),
                    module_name: module.name.clone(),
                });
            }
        }

        for node in nodes {
            let key = node.key();
            self.module_nodes
                .entry(node.module_name.clone())
                .or_default()
                .push(key.clone());
            self.dependencies.entry(key.clone()).or_default();
            self.dependants.entry(key.clone()).or_default();
            self.nodes.insert(key, node);
        }
    }

    fn insert_edges(&mut self) -> Result<(), GraphError> {
        let mut edges: Vec<(String, String)> = Vec::new();

        for module in self.modules.iter() {
            let build_key = NodeRef::new(NodeKind::Build, &module.name).key();

            for dep in &module.build.dependencies {
                if self.modules.get(&dep.name).is_none() {
                    return Err(GraphError::UnknownDependency {
                        referer: build_key.clone(),
                        kind: "module",
                        name: dep.name.clone(),
                    });
                }
                edges.push((
                    build_key.clone(),
                    NodeRef::new(NodeKind::Build, &dep.name).key(),
                ));
            }

            for service in &module.service_configs {
                let key = NodeRef::new(NodeKind::Deploy, &service.name).key();
                let source_build =
                    NodeRef::new(NodeKind::Build, service.source_module()).key();
                if !self.nodes.contains_key(&source_build) {
                    return Err(GraphError::UnknownDependency {
                        referer: key.clone(),
                        kind: "module",
                        name: service.source_module().to_string(),
                    });
                }
                edges.push((key.clone(), source_build));
                for dep in &service.dependencies {
                    edges.push((key.clone(), self.resolve_runtime_dep(&key, dep)?));
                }
            }

            for task in &module.task_configs {
                let key = NodeRef::new(NodeKind::Run, &task.name).key();
                edges.push((key.clone(), build_key.clone()));
                for dep in &task.dependencies {
                    edges.push((key.clone(), self.resolve_runtime_dep(&key, dep)?));
                }
            }

            for test in &module.test_configs {
                let key = NodeRef::new(NodeKind::Test, test.key()).key();
                edges.push((key.clone(), build_key.clone()));
                for dep in &test.dependencies {
                    edges.push((key.clone(), self.resolve_runtime_dep(&key, dep)?));
                }
            }
        }

        for (from, to) in edges {
            self.dependencies.entry(from.clone()).or_default().insert(to.clone());
            self.dependants.entry(to).or_default().insert(from);
        }
        Ok(())
    }

    /// Resolve a declared service-or-task dependency name against the global
    /// name registries.
    fn resolve_runtime_dep(&self, referer: &str, name: &str) -> Result<String, GraphError> {
        if self.modules.service(name).is_some() {
            Ok(NodeRef::new(NodeKind::Deploy, name).key())
        } else if self.modules.task(name).is_some() {
            Ok(NodeRef::new(NodeKind::Run, name).key())
        } else {
            Err(GraphError::UnknownDependency {
                referer: referer.to_string(),
                kind: "service or task",
                name: name.to_string(),
            })
        }
    }

    /// DFS coloring; a back edge means a cycle, reported with the offending
    /// path.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        let mut color: HashMap<&str, u8> =
            self.nodes.keys().map(|k| (k.as_str(), WHITE)).collect();

        fn visit<'a>(
            node: &'a str,
            deps: &'a HashMap<String, BTreeSet<String>>,
            color: &mut HashMap<&'a str, u8>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            color.insert(node, GRAY);
            stack.push(node);

            if let Some(neighbors) = deps.get(node) {
                for neighbor in neighbors {
                    match color.get(neighbor.as_str()) {
                        Some(&GRAY) => {
                            let start = stack
                                .iter()
                                .position(|n| *n == neighbor.as_str())
                                .unwrap_or(0);
                            let mut cycle: Vec<String> =
                                stack[start..].iter().map(|s| s.to_string()).collect();
                            cycle.push(neighbor.clone());
                            return Some(cycle);
                        }
                        Some(&WHITE) => {
                            if let Some(cycle) = visit(neighbor, deps, color, stack) {
                                return Some(cycle);
                            }
                        }
                        _ => {}
                    }
                }
            }

            stack.pop();
            color.insert(node, BLACK);
            None
        }

        for key in self.nodes.keys() {
            if color.get(key.as_str()) == Some(&WHITE) {
                let mut stack = Vec::new();
                if let Some(cycle) = visit(key, &self.dependencies, &mut color, &mut stack) {
                    return Err(GraphError::CircularDependency { cycle });
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, kind: NodeKind, name: &str) -> Result<&GraphNode, GraphError> {
        self.nodes
            .get(&NodeRef::new(kind, name).key())
            .ok_or(GraphError::UnknownNode {
                kind: kind.prefix(),
                name: name.to_string(),
            })
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    /// Direct or transitive dependencies of a node, optionally filtered.
    pub fn dependencies(
        &self,
        kind: NodeKind,
        name: &str,
        recursive: bool,
        filter: Option<&dyn Fn(&GraphNode) -> bool>,
    ) -> Result<Vec<&GraphNode>, GraphError> {
        let node = self.node(kind, name)?;
        Ok(self.walk(&node.key(), &self.dependencies, recursive, filter))
    }

    /// Direct or transitive dependants of a node, optionally filtered.
    pub fn dependants(
        &self,
        kind: NodeKind,
        name: &str,
        recursive: bool,
        filter: Option<&dyn Fn(&GraphNode) -> bool>,
    ) -> Result<Vec<&GraphNode>, GraphError> {
        let node = self.node(kind, name)?;
        Ok(self.walk(&node.key(), &self.dependants, recursive, filter))
    }

    pub fn dependencies_for_many(
        &self,
        refs: &[NodeRef],
        recursive: bool,
    ) -> Result<Vec<&GraphNode>, GraphError> {
        self.relations_for_many(refs, recursive, |kind, name, recursive| {
            self.dependencies(kind, name, recursive, None)
        })
    }

    pub fn dependants_for_many(
        &self,
        refs: &[NodeRef],
        recursive: bool,
    ) -> Result<Vec<&GraphNode>, GraphError> {
        self.relations_for_many(refs, recursive, |kind, name, recursive| {
            self.dependants(kind, name, recursive, None)
        })
    }

    fn relations_for_many<'a, F>(
        &'a self,
        refs: &[NodeRef],
        recursive: bool,
        get: F,
    ) -> Result<Vec<&'a GraphNode>, GraphError>
    where
        F: Fn(NodeKind, &str, bool) -> Result<Vec<&'a GraphNode>, GraphError>,
    {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for r in refs {
            for node in get(r.kind, &r.name, recursive)? {
                if seen.insert(node.key()) {
                    out.push(node);
                }
            }
        }
        Ok(out)
    }

    /// The unique set of modules touched by a relation set.
    pub fn modules_for_relations(&self, nodes: &[&GraphNode]) -> Vec<&Module> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for node in nodes {
            if seen.insert(node.module_name.clone()) {
                if let Some(module) = self.modules.get(&node.module_name) {
                    out.push(module);
                }
            }
        }
        out
    }

    /// The given modules plus every module that transitively depends on any
    /// of them. Used for watch-mode fan-out.
    pub fn with_dependant_modules(
        &self,
        module_names: &[&str],
    ) -> Result<Vec<&Module>, GraphError> {
        let mut result: BTreeSet<String> = BTreeSet::new();
        for name in module_names {
            self.modules.require(name)?;
            result.insert(name.to_string());
            for key in self.module_nodes.get(*name).into_iter().flatten() {
                let node = &self.nodes[key];
                let dependants =
                    self.dependants(node.kind, &node.name, true, None)?;
                for dependant in dependants {
                    result.insert(dependant.module_name.clone());
                }
            }
        }
        Ok(result
            .iter()
            .filter_map(|name| self.modules.get(name))
            .collect())
    }

    fn walk<'a>(
        &'a self,
        start: &str,
        edges: &'a HashMap<String, BTreeSet<String>>,
        recursive: bool,
        filter: Option<&dyn Fn(&GraphNode) -> bool>,
    ) -> Vec<&'a GraphNode> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut queue: Vec<&str> = edges
            .get(start)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect();
        let mut keys: BTreeSet<&str> = BTreeSet::new();

        while let Some(key) = queue.pop() {
            if !seen.insert(key) {
                continue;
            }
            keys.insert(key);
            if recursive {
                queue.extend(edges.get(key).into_iter().flatten().map(String::as_str));
            }
        }

        keys.iter()
            .filter_map(|k| self.nodes.get(*k))
            .filter(|n| filter.map(|f| f(n)).unwrap_or(true))
            .collect()
    }
}
