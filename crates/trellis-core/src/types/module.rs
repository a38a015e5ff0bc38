//! Module type definitions
//!
//! A Module is the unit of source code producing a build artifact. Services,
//! tasks and tests are owned by their module; lookups across modules go
//! through [`ModuleSet`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GraphError;

use super::runtime::{ServiceConfig, TaskConfig, TestConfig};

/// A file-copy directive attached to a build dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySpec {
    /// Path relative to the dependency's build output.
    pub source: String,
    /// Path relative to the depending module's build directory.
    #[serde(default)]
    pub target: String,
}

/// A declared build-time dependency on another module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDependency {
    pub name: String,
    #[serde(default)]
    pub copy: Vec<CopySpec>,
}

/// Build section of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<BuildDependency>,
}

/// A fully-resolved module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Unique name across the project.
    pub name: String,
    /// Type tag selecting the handler family (e.g. "container", "exec").
    pub module_type: String,
    /// Absolute path to the module root.
    pub path: PathBuf,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub allow_publish: bool,
    #[serde(default)]
    pub build: BuildConfig,
    /// Services this module deploys.
    #[serde(default)]
    pub service_configs: Vec<ServiceConfig>,
    /// One-shot tasks this module defines.
    #[serde(default)]
    pub task_configs: Vec<TaskConfig>,
    /// Test suites this module defines.
    #[serde(default)]
    pub test_configs: Vec<TestConfig>,
    /// Free-form provider-specific configuration, fully template-resolved.
    #[serde(default)]
    pub spec: Value,
    /// Outputs computed by the module's provider.
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
}

impl Module {
    pub fn new(name: impl Into<String>, module_type: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            module_type: module_type.into(),
            path,
            description: None,
            repository_url: None,
            allow_publish: false,
            build: BuildConfig::default(),
            service_configs: Vec::new(),
            task_configs: Vec::new(),
            test_configs: Vec::new(),
            spec: Value::Null,
            outputs: HashMap::new(),
        }
    }

    /// Names of modules this module's build depends on.
    pub fn build_dependency_names(&self) -> Vec<&str> {
        self.build
            .dependencies
            .iter()
            .map(|d| d.name.as_str())
            .collect()
    }
}

/// An indexed set of modules with global service/task name registries.
///
/// Construction enforces the cross-module uniqueness invariants: module
/// names are unique, service and task names are globally unique and the
/// two namespaces do not overlap.
#[derive(Debug, Clone, Default)]
pub struct ModuleSet {
    modules: BTreeMap<String, Module>,
    service_owners: HashMap<String, String>,
    task_owners: HashMap<String, String>,
}

impl ModuleSet {
    pub fn new(modules: Vec<Module>) -> Result<Self, GraphError> {
        let mut set = Self::default();
        for module in modules {
            if let Some(existing) = set.modules.get(&module.name) {
                return Err(GraphError::NameCollision {
                    kind: "module",
                    name: module.name.clone(),
                    modules: vec![existing.name.clone(), module.name.clone()],
                });
            }
            for service in &module.service_configs {
                if let Some(owner) = set
                    .service_owners
                    .insert(service.name.clone(), module.name.clone())
                {
                    return Err(GraphError::NameCollision {
                        kind: "service",
                        name: service.name.clone(),
                        modules: vec![owner, module.name.clone()],
                    });
                }
            }
            for task in &module.task_configs {
                if let Some(owner) = set
                    .task_owners
                    .insert(task.name.clone(), module.name.clone())
                {
                    return Err(GraphError::NameCollision {
                        kind: "task",
                        name: task.name.clone(),
                        modules: vec![owner, module.name.clone()],
                    });
                }
            }
            set.modules.insert(module.name.clone(), module);
        }

        // Service and task names must not overlap.
        for (name, owner) in &set.service_owners {
            if let Some(task_owner) = set.task_owners.get(name) {
                return Err(GraphError::NameCollision {
                    kind: "service/task",
                    name: name.clone(),
                    modules: vec![owner.clone(), task_owner.clone()],
                });
            }
        }

        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Module, GraphError> {
        self.modules
            .get(name)
            .ok_or_else(|| GraphError::UnknownModule(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module owning the named service.
    pub fn service_owner(&self, service: &str) -> Option<&Module> {
        self.service_owners
            .get(service)
            .and_then(|m| self.modules.get(m))
    }

    /// Module owning the named task.
    pub fn task_owner(&self, task: &str) -> Option<&Module> {
        self.task_owners.get(task).and_then(|m| self.modules.get(m))
    }

    /// The service config for `name`, if declared anywhere in the set.
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.service_owner(name)
            .and_then(|m| m.service_configs.iter().find(|s| s.name == name))
    }

    /// The task config for `name`, if declared anywhere in the set.
    pub fn task(&self, name: &str) -> Option<&TaskConfig> {
        self.task_owner(name)
            .and_then(|m| m.task_configs.iter().find(|t| t.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_with_service(module: &str, service: &str) -> Module {
        let mut m = Module::new(module, "test", PathBuf::from("/project").join(module));
        m.service_configs.push(ServiceConfig::new(service, module));
        m
    }

    #[test]
    fn test_module_set_indexes_owners() {
        let set = ModuleSet::new(vec![
            module_with_service("api", "api-svc"),
            module_with_service("worker", "worker-svc"),
        ])
        .expect("set");

        assert_eq!(set.len(), 2);
        assert_eq!(set.service_owner("api-svc").map(|m| m.name.as_str()), Some("api"));
        assert!(set.service("worker-svc").is_some());
        assert!(set.service_owner("missing").is_none());
    }

    #[test]
    fn test_module_set_rejects_duplicate_service_names() {
        let result = ModuleSet::new(vec![
            module_with_service("a", "svc"),
            module_with_service("b", "svc"),
        ]);
        assert!(matches!(
            result,
            Err(GraphError::NameCollision { kind: "service", .. })
        ));
    }

    #[test]
    fn test_module_set_rejects_service_task_overlap() {
        let mut a = Module::new("a", "test", PathBuf::from("/project/a"));
        a.service_configs.push(ServiceConfig::new("shared", "a"));
        let mut b = Module::new("b", "test", PathBuf::from("/project/b"));
        b.task_configs.push(TaskConfig::new("shared", "b"));

        let result = ModuleSet::new(vec![a, b]);
        assert!(matches!(result, Err(GraphError::NameCollision { .. })));
    }
}
