//! # Trellis SPI
//!
//! The interface provider plugins implement: a factory producing a
//! descriptor that declares plugin-level and per-module-type action
//! handlers, an optional config schema, and inter-provider dependencies.
//! Handler contracts are validated on registration and invocation.

mod schema;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use thiserror::Error;

pub use schema::validate_schema;

/// Actions addressed at a plugin as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginActionKind {
    ConfigureProvider,
    GetEnvironmentStatus,
    PrepareEnvironment,
    CleanupEnvironment,
    GetSecret,
    SetSecret,
    DeleteSecret,
}

impl PluginActionKind {
    pub const ALL: [PluginActionKind; 7] = [
        PluginActionKind::ConfigureProvider,
        PluginActionKind::GetEnvironmentStatus,
        PluginActionKind::PrepareEnvironment,
        PluginActionKind::CleanupEnvironment,
        PluginActionKind::GetSecret,
        PluginActionKind::SetSecret,
        PluginActionKind::DeleteSecret,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PluginActionKind::ConfigureProvider => "configure_provider",
            PluginActionKind::GetEnvironmentStatus => "get_environment_status",
            PluginActionKind::PrepareEnvironment => "prepare_environment",
            PluginActionKind::CleanupEnvironment => "cleanup_environment",
            PluginActionKind::GetSecret => "get_secret",
            PluginActionKind::SetSecret => "set_secret",
            PluginActionKind::DeleteSecret => "delete_secret",
        }
    }

    pub fn input_schema(&self) -> Value {
        match self {
            PluginActionKind::GetSecret | PluginActionKind::DeleteSecret => json!({
                "type": "object",
                "required": ["key"],
                "properties": {"key": {"type": "string"}}
            }),
            PluginActionKind::SetSecret => json!({
                "type": "object",
                "required": ["key", "value"],
                "properties": {
                    "key": {"type": "string"},
                    "value": {"type": "string"}
                }
            }),
            _ => json!({"type": "object"}),
        }
    }

    pub fn output_schema(&self) -> Value {
        match self {
            PluginActionKind::GetEnvironmentStatus => json!({
                "type": "object",
                "required": ["ready"],
                "properties": {"ready": {"type": "boolean"}}
            }),
            PluginActionKind::PrepareEnvironment => json!({
                "type": "object",
                "required": ["outputs"],
                "properties": {"outputs": {"type": "object"}}
            }),
            PluginActionKind::GetSecret => json!({
                "type": ["object", "null"]
            }),
            _ => json!({"type": ["object", "null"]}),
        }
    }
}

impl fmt::Display for PluginActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Actions addressed at a module, or at a service/task owned by one. The
/// dispatcher derives the module type before selecting a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModuleActionKind {
    Configure,
    Build,
    GetBuildStatus,
    PushModule,
    PublishModule,
    RunModule,
    TestModule,
    GetTestResult,
    GetServiceStatus,
    DeployService,
    DeleteService,
    ExecInService,
    GetServiceLogs,
    RunService,
    HotReloadService,
    RunTask,
}

impl ModuleActionKind {
    pub const ALL: [ModuleActionKind; 16] = [
        ModuleActionKind::Configure,
        ModuleActionKind::Build,
        ModuleActionKind::GetBuildStatus,
        ModuleActionKind::PushModule,
        ModuleActionKind::PublishModule,
        ModuleActionKind::RunModule,
        ModuleActionKind::TestModule,
        ModuleActionKind::GetTestResult,
        ModuleActionKind::GetServiceStatus,
        ModuleActionKind::DeployService,
        ModuleActionKind::DeleteService,
        ModuleActionKind::ExecInService,
        ModuleActionKind::GetServiceLogs,
        ModuleActionKind::RunService,
        ModuleActionKind::HotReloadService,
        ModuleActionKind::RunTask,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModuleActionKind::Configure => "configure",
            ModuleActionKind::Build => "build",
            ModuleActionKind::GetBuildStatus => "get_build_status",
            ModuleActionKind::PushModule => "push_module",
            ModuleActionKind::PublishModule => "publish_module",
            ModuleActionKind::RunModule => "run_module",
            ModuleActionKind::TestModule => "test_module",
            ModuleActionKind::GetTestResult => "get_test_result",
            ModuleActionKind::GetServiceStatus => "get_service_status",
            ModuleActionKind::DeployService => "deploy_service",
            ModuleActionKind::DeleteService => "delete_service",
            ModuleActionKind::ExecInService => "exec_in_service",
            ModuleActionKind::GetServiceLogs => "get_service_logs",
            ModuleActionKind::RunService => "run_service",
            ModuleActionKind::HotReloadService => "hot_reload_service",
            ModuleActionKind::RunTask => "run_task",
        }
    }

    pub fn input_schema(&self) -> Value {
        match self {
            ModuleActionKind::Configure
            | ModuleActionKind::Build
            | ModuleActionKind::GetBuildStatus
            | ModuleActionKind::PushModule
            | ModuleActionKind::PublishModule
            | ModuleActionKind::RunModule
            | ModuleActionKind::TestModule
            | ModuleActionKind::GetTestResult => json!({
                "type": "object",
                "required": ["module"],
                "properties": {"module": {"type": "object"}}
            }),
            ModuleActionKind::RunTask => json!({
                "type": "object",
                "required": ["task"],
                "properties": {"task": {"type": "object"}}
            }),
            _ => json!({
                "type": "object",
                "required": ["service"],
                "properties": {"service": {"type": "object"}}
            }),
        }
    }

    pub fn output_schema(&self) -> Value {
        match self {
            ModuleActionKind::GetBuildStatus => json!({
                "type": "object",
                "required": ["ready"],
                "properties": {"ready": {"type": "boolean"}}
            }),
            ModuleActionKind::PushModule => json!({
                "type": "object",
                "required": ["pushed"],
                "properties": {"pushed": {"type": "boolean"}}
            }),
            ModuleActionKind::PublishModule => json!({
                "type": "object",
                "required": ["published"],
                "properties": {"published": {"type": "boolean"}}
            }),
            ModuleActionKind::GetTestResult | ModuleActionKind::GetServiceStatus => {
                json!({"type": ["object", "null"]})
            }
            _ => json!({"type": ["object", "null"]}),
        }
    }
}

impl fmt::Display for ModuleActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Plugin failures: factory errors, descriptor/config rejections, handler
/// failures and schema violations.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin factory for '{name}' failed: {reason}")]
    Factory { name: String, reason: String },
    #[error("invalid plugin descriptor for '{name}': {reason}")]
    Descriptor { name: String, reason: String },
    #[error("provider config for '{name}' is invalid: {reason}")]
    Config { name: String, reason: String },
    #[error("handler '{action}' of plugin '{plugin}' failed: {reason}")]
    Handler {
        plugin: String,
        action: String,
        reason: String,
    },
    #[error("{context}: schema validation failed at {path}: {reason}")]
    Schema {
        context: String,
        path: String,
        reason: String,
    },
}

/// Handle passed into every handler invocation.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub plugin_name: String,
    pub project_name: String,
}

/// An action handler registered by a plugin.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, params: Value, ctx: PluginContext) -> Result<Value, PluginError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> ActionHandler for FnHandler<F>
where
    F: Fn(Value, PluginContext) -> BoxFuture<'static, Result<Value, PluginError>> + Send + Sync,
{
    async fn call(&self, params: Value, ctx: PluginContext) -> Result<Value, PluginError> {
        (self.0)(params, ctx).await
    }
}

/// Wrap an async closure as an [`ActionHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(Value, PluginContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, PluginError>> + Send + 'static,
{
    Arc::new(FnHandler(
        move |params, ctx| -> BoxFuture<'static, Result<Value, PluginError>> {
            Box::pin(f(params, ctx))
        },
    ))
}

/// What a plugin factory returns.
#[derive(Clone, Default)]
pub struct PluginDescriptor {
    pub name: String,
    /// Validates the provider's configuration, if present.
    pub config_schema: Option<Value>,
    /// Names of plugins this plugin depends on.
    pub dependencies: Vec<String>,
    /// Paths of modules bundled with the plugin.
    pub module_paths: Vec<String>,
    /// Plugin-level handlers.
    pub actions: HashMap<PluginActionKind, Arc<dyn ActionHandler>>,
    /// Per-module-type handlers.
    pub module_actions: HashMap<String, HashMap<ModuleActionKind, Arc<dyn ActionHandler>>>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_config_schema(mut self, schema: Value) -> Self {
        self.config_schema = Some(schema);
        self
    }

    pub fn with_dependency(mut self, plugin: impl Into<String>) -> Self {
        self.dependencies.push(plugin.into());
        self
    }

    pub fn add_action(mut self, kind: PluginActionKind, handler: Arc<dyn ActionHandler>) -> Self {
        self.actions.insert(kind, handler);
        self
    }

    pub fn add_module_action(
        mut self,
        module_type: impl Into<String>,
        kind: ModuleActionKind,
        handler: Arc<dyn ActionHandler>,
    ) -> Self {
        self.module_actions
            .entry(module_type.into())
            .or_default()
            .insert(kind, handler);
        self
    }

    /// Validate the descriptor against the plugin contract.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.name.trim().is_empty() {
            return Err(PluginError::Descriptor {
                name: self.name.clone(),
                reason: "plugin name must not be empty".to_string(),
            });
        }
        if let Some(schema) = &self.config_schema {
            if !schema.is_object() {
                return Err(PluginError::Descriptor {
                    name: self.name.clone(),
                    reason: "config_schema must be an object".to_string(),
                });
            }
        }
        for module_type in self.module_actions.keys() {
            if module_type.trim().is_empty() {
                return Err(PluginError::Descriptor {
                    name: self.name.clone(),
                    reason: "module action map contains an empty module type".to_string(),
                });
            }
        }
        for dependency in &self.dependencies {
            if dependency.trim().is_empty() {
                return Err(PluginError::Descriptor {
                    name: self.name.clone(),
                    reason: "dependencies must not contain empty names".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Parameters handed to a plugin factory.
#[derive(Debug, Clone)]
pub struct PluginFactoryParams {
    pub project_name: String,
}

/// Creates a plugin descriptor for a project.
pub trait PluginFactory: Send + Sync {
    fn create(&self, params: &PluginFactoryParams) -> Result<PluginDescriptor, PluginError>;
}

impl<F> PluginFactory for F
where
    F: Fn(&PluginFactoryParams) -> Result<PluginDescriptor, PluginError> + Send + Sync,
{
    fn create(&self, params: &PluginFactoryParams) -> Result<PluginDescriptor, PluginError> {
        self(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> Arc<dyn ActionHandler> {
        handler_fn(|_params, _ctx| async { Ok(Value::Null) })
    }

    #[test]
    fn test_descriptor_builder_and_validation() {
        let descriptor = PluginDescriptor::new("container")
            .with_config_schema(json!({"type": "object"}))
            .with_dependency("exec")
            .add_action(PluginActionKind::PrepareEnvironment, noop_handler())
            .add_module_action("container", ModuleActionKind::Build, noop_handler());

        assert!(descriptor.validate().is_ok());
        assert_eq!(descriptor.dependencies, vec!["exec"]);
        assert!(descriptor
            .module_actions
            .get("container")
            .map(|m| m.contains_key(&ModuleActionKind::Build))
            .unwrap_or(false));
    }

    #[test]
    fn test_descriptor_rejects_empty_name() {
        assert!(PluginDescriptor::new("  ").validate().is_err());
    }

    #[test]
    fn test_descriptor_rejects_non_object_config_schema() {
        let descriptor = PluginDescriptor::new("p").with_config_schema(json!("not a schema"));
        assert!(matches!(
            descriptor.validate(),
            Err(PluginError::Descriptor { .. })
        ));
    }

    #[tokio::test]
    async fn test_handler_fn_receives_context() {
        let handler = handler_fn(|params, ctx| async move {
            Ok(json!({
                "plugin": ctx.plugin_name,
                "echo": params,
            }))
        });
        let out = handler
            .call(
                json!({"x": 1}),
                PluginContext {
                    plugin_name: "p1".to_string(),
                    project_name: "demo".to_string(),
                },
            )
            .await
            .expect("ok");
        assert_eq!(out["plugin"], json!("p1"));
        assert_eq!(out["echo"], json!({"x": 1}));
    }

    #[test]
    fn test_action_kind_names_are_stable() {
        assert_eq!(PluginActionKind::PrepareEnvironment.name(), "prepare_environment");
        assert_eq!(ModuleActionKind::HotReloadService.name(), "hot_reload_service");
        assert_eq!(PluginActionKind::ALL.len(), 7);
        assert_eq!(ModuleActionKind::ALL.len(), 16);
    }
}
