//! Declaration records parsed from config documents.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use trellis_core::types::BuildConfig;

/// A single record from a config document.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigDeclaration {
    Project(ProjectConfig),
    Module(ModuleDeclaration),
}

/// Project-level declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub default_environment: Option<String>,
    /// Defaults merged into every environment.
    #[serde(default)]
    pub environment_defaults: EnvironmentDefaults,
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
    /// Remote project sources scanned in addition to the root.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDefaults {
    #[serde(default)]
    pub providers: Vec<ProviderDeclaration>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    #[serde(default)]
    pub providers: Vec<ProviderDeclaration>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

impl ProjectConfig {
    /// The named environment with environment defaults applied. Providers
    /// declared on the environment override same-named defaults; variables
    /// merge with the environment winning.
    pub fn environment(&self, name: &str) -> Option<EnvironmentConfig> {
        let env = self.environments.iter().find(|e| e.name == name)?;
        let mut providers = self.environment_defaults.providers.clone();
        for provider in &env.providers {
            if let Some(existing) = providers.iter_mut().find(|p| p.name == provider.name) {
                *existing = provider.clone();
            } else {
                providers.push(provider.clone());
            }
        }
        let mut variables = self.environment_defaults.variables.clone();
        variables.extend(env.variables.clone());
        Some(EnvironmentConfig {
            name: env.name.clone(),
            providers,
            variables,
        })
    }

    /// Project variables overlaid with the named environment's variables
    /// (environment wins). This is what the provider context exposes as
    /// `variables.*`.
    pub fn merged_variables(&self, environment: &str) -> BTreeMap<String, Value> {
        let mut variables = self.variables.clone();
        if let Some(env) = self.environment(environment) {
            variables.extend(env.variables);
        }
        variables
    }
}

/// Provider entry inside an environment. Unknown keys form the
/// provider-specific configuration validated by the plugin schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderDeclaration {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(flatten)]
    pub config: BTreeMap<String, Value>,
}

/// A named remote source of project configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub name: String,
    pub repository_url: String,
}

/// Module-level declaration. Unknown top-level keys are collected into
/// `spec`, the provider-specific surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDeclaration {
    #[serde(rename = "type")]
    pub module_type: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub allow_publish: bool,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub services: Vec<ServiceDeclaration>,
    #[serde(default)]
    pub tasks: Vec<TaskDeclaration>,
    #[serde(default)]
    pub tests: Vec<TestDeclaration>,
    #[serde(flatten)]
    pub spec: BTreeMap<String, Value>,
    /// Absolute path of the declaring directory; set by the loader.
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDeclaration {
    pub name: String,
    #[serde(default)]
    pub source_module: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub hot_reloadable: bool,
    #[serde(default)]
    pub spec: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDeclaration {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub spec: Value,
    /// Seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl TaskDeclaration {
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDeclaration {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_module_declaration_collects_unknown_keys_into_spec() {
        let yaml = r#"
type: container
name: api
build:
  command: ["make", "build"]
image: registry.local/api
ports:
  - 8080
"#;
        let module: ModuleDeclaration = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(module.module_type, "container");
        assert_eq!(module.spec.get("image"), Some(&json!("registry.local/api")));
        assert_eq!(module.spec.get("ports"), Some(&json!([8080])));
        assert!(!module.spec.contains_key("build"));
    }

    #[test]
    fn test_environment_merges_defaults() {
        let yaml = r#"
name: demo
environmentDefaults:
  providers:
    - name: container
      registry: default.local
  variables:
    region: eu-west-1
    logLevel: info
environments:
  - name: prod
    providers:
      - name: container
        registry: prod.local
    variables:
      logLevel: warn
"#;
        let project: ProjectConfig = serde_yaml::from_str(yaml).expect("parse");
        let env = project.environment("prod").expect("env");

        assert_eq!(env.providers.len(), 1);
        assert_eq!(
            env.providers[0].config.get("registry"),
            Some(&json!("prod.local"))
        );
        assert_eq!(env.variables.get("region"), Some(&json!("eu-west-1")));
        assert_eq!(env.variables.get("logLevel"), Some(&json!("warn")));
        assert!(project.environment("missing").is_none());
    }

    #[test]
    fn test_merged_variables_environment_wins() {
        let yaml = r#"
name: demo
variables:
  region: us-east-1
  owner: platform
environments:
  - name: prod
    variables:
      region: eu-west-1
"#;
        let project: ProjectConfig = serde_yaml::from_str(yaml).expect("parse");
        let variables = project.merged_variables("prod");
        assert_eq!(variables.get("region"), Some(&json!("eu-west-1")));
        assert_eq!(variables.get("owner"), Some(&json!("platform")));
    }
}
