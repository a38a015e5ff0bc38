//! Service, task and test configurations.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A long-running deployable defined by a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Globally unique service name.
    pub name: String,
    /// Name of the owning module.
    pub module_name: String,
    /// Module whose code this service deploys, when different from the owner.
    #[serde(default)]
    pub source_module_name: Option<String>,
    /// Names of services and tasks this service depends on at runtime.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether the service may be driven by a hot-reload task.
    #[serde(default)]
    pub hot_reloadable: bool,
    #[serde(default)]
    pub spec: Value,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_name: module_name.into(),
            source_module_name: None,
            dependencies: Vec::new(),
            hot_reloadable: false,
            spec: Value::Null,
        }
    }

    /// The module whose sources feed this service.
    pub fn source_module(&self) -> &str {
        self.source_module_name.as_deref().unwrap_or(&self.module_name)
    }
}

/// A one-shot runnable defined by a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Globally unique task name.
    pub name: String,
    pub module_name: String,
    /// Services that must be running and tasks that must have succeeded.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub spec: Value,
    /// Wall-clock limit enforced by the task body itself.
    #[serde(default, with = "optional_duration_secs")]
    pub timeout: Option<Duration>,
}

impl TaskConfig {
    pub fn new(name: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_name: module_name.into(),
            dependencies: Vec::new(),
            spec: Value::Null,
            timeout: None,
        }
    }
}

/// A module-scoped test suite. Keyed as `<module>.<name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    /// Name, unique within the owning module.
    pub name: String,
    pub module_name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub spec: Value,
    #[serde(default, with = "optional_duration_secs")]
    pub timeout: Option<Duration>,
}

impl TestConfig {
    pub fn new(name: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_name: module_name.into(),
            dependencies: Vec::new(),
            spec: Value::Null,
            timeout: None,
        }
    }

    /// Fully-qualified test key.
    pub fn key(&self) -> String {
        format!("{}.{}", self.module_name, self.name)
    }
}

mod optional_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs: Option<u64> = Option::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
