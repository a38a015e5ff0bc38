//! Context layers.
//!
//! Three layers build on each other: the project layer exposes process
//! environment and platform, the provider layer adds environment name,
//! provider outputs and merged variables, and the module layer adds
//! per-module paths, outputs, versions and service outputs.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::node::{ContextNode, LazyValue};

/// Project-level context: `local.env.*`, `local.platform`, `project.name`.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub project_name: String,
    pub env: BTreeMap<String, String>,
    pub platform: String,
}

impl ProjectContext {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            env: BTreeMap::new(),
            platform: std::env::consts::OS.to_string(),
        }
    }

    /// Capture the current process environment.
    pub fn from_process(project_name: impl Into<String>) -> Self {
        let mut ctx = Self::new(project_name);
        ctx.env = std::env::vars().collect();
        ctx
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn build(&self) -> ContextNode {
        let mut root = ContextNode::tree();
        root.set_path("project.name", ContextNode::from(self.project_name.as_str()));
        root.set_path("local.platform", ContextNode::from(self.platform.as_str()));
        let mut env = ContextNode::tree();
        for (key, value) in &self.env {
            env.set_path(key, ContextNode::from(value.as_str()));
        }
        root.set_path("local.env", env);
        root
    }
}

/// Provider-level context. Resolving `providers.<name>` triggers that
/// provider's outputs callback.
pub struct ProviderContext {
    pub project: ProjectContext,
    pub environment_name: String,
    pub variables: BTreeMap<String, Value>,
    providers: BTreeMap<String, Arc<dyn LazyValue>>,
}

impl ProviderContext {
    pub fn new(project: ProjectContext, environment_name: impl Into<String>) -> Self {
        Self {
            project,
            environment_name: environment_name.into(),
            variables: BTreeMap::new(),
            providers: BTreeMap::new(),
        }
    }

    /// Merged project and environment variables, environment winning.
    pub fn with_variables(mut self, variables: BTreeMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn add_provider(&mut self, name: impl Into<String>, outputs: Arc<dyn LazyValue>) {
        self.providers.insert(name.into(), outputs);
    }

    pub fn build(&self) -> ContextNode {
        let mut root = self.project.build();
        root.set_path(
            "environment.name",
            ContextNode::from(self.environment_name.as_str()),
        );
        for (name, outputs) in &self.providers {
            root.set_path(
                &format!("providers.{}", name),
                ContextNode::lazy(outputs.clone()),
            );
        }
        for (name, value) in &self.variables {
            root.set_path(
                &format!("variables.{}", name),
                ContextNode::Value(value.clone()),
            );
        }
        root
    }
}

/// Per-module entry in the module layer.
pub struct ModuleContextEntry {
    pub name: String,
    pub path: String,
    pub build_path: String,
    pub version: String,
    pub outputs: Value,
    services: BTreeMap<String, Arc<dyn LazyValue>>,
}

impl ModuleContextEntry {
    pub fn new(name: impl Into<String>, path: &Path, build_path: &Path) -> Self {
        Self {
            name: name.into(),
            path: path.display().to_string(),
            build_path: build_path.display().to_string(),
            version: String::new(),
            outputs: Value::Object(serde_json::Map::new()),
            services: BTreeMap::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_outputs(mut self, outputs: Value) -> Self {
        self.outputs = outputs;
        self
    }

    /// Service outputs stay lazy; reading them may query a live runtime.
    pub fn add_service(&mut self, name: impl Into<String>, outputs: Arc<dyn LazyValue>) {
        self.services.insert(name.into(), outputs);
    }
}

/// Module-level context: `modules.<name>.{path, buildPath, outputs, version,
/// services.<name>.outputs}`.
pub struct ModuleContext {
    pub provider: ProviderContext,
    modules: Vec<ModuleContextEntry>,
}

impl ModuleContext {
    pub fn new(provider: ProviderContext) -> Self {
        Self {
            provider,
            modules: Vec::new(),
        }
    }

    pub fn add_module(&mut self, entry: ModuleContextEntry) {
        self.modules.push(entry);
    }

    pub fn build(&self) -> ContextNode {
        let mut root = self.provider.build();
        for module in &self.modules {
            let prefix = format!("modules.{}", module.name);
            root.set_path(
                &format!("{}.path", prefix),
                ContextNode::from(module.path.as_str()),
            );
            root.set_path(
                &format!("{}.buildPath", prefix),
                ContextNode::from(module.build_path.as_str()),
            );
            root.set_path(
                &format!("{}.version", prefix),
                ContextNode::from(module.version.as_str()),
            );
            root.set_path(
                &format!("{}.outputs", prefix),
                ContextNode::Value(module.outputs.clone()),
            );
            for (service, outputs) in &module.services {
                root.set_path(
                    &format!("{}.services.{}.outputs", prefix, service),
                    ContextNode::lazy(outputs.clone()),
                );
            }
        }
        root
    }
}
