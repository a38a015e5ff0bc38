//! Typed action dispatch.
//!
//! Every invocation follows the same wrapper: validate input params against
//! the action's input schema, inject a [`PluginContext`], invoke the
//! handler, validate the output. Module actions derive the module type from
//! the module; service and task actions derive it from the owning module.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use thiserror::Error;

use trellis_core::types::ModuleSet;
use trellis_spi::{
    validate_schema, ActionHandler, ModuleActionKind, PluginActionKind, PluginContext, PluginError,
};

use crate::registry::ProviderRegistry;

/// Dispatch failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(
        "no handler for action '{action}' (module type: {}, plugin: {})",
        module_type.as_deref().unwrap_or("-"),
        plugin.as_deref().unwrap_or("any")
    )]
    NoHandler {
        action: String,
        module_type: Option<String>,
        plugin: Option<String>,
    },
    #[error("unknown {kind} '{name}'")]
    UnknownParameter { kind: &'static str, name: String },
    #[error("params for action '{action}' must be an object")]
    InvalidParams { action: String },
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// Per-invocation dispatch options.
#[derive(Clone, Default)]
pub struct DispatchOptions {
    /// Select a specific plugin instead of the last-registered one.
    pub plugin_name: Option<String>,
    /// Caller-supplied fallback when no handler is registered.
    pub default_handler: Option<Arc<dyn ActionHandler>>,
}

impl DispatchOptions {
    pub fn plugin(name: impl Into<String>) -> Self {
        Self {
            plugin_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_default(handler: Arc<dyn ActionHandler>) -> Self {
        Self {
            default_handler: Some(handler),
            ..Self::default()
        }
    }
}

/// Routes action invocations to plugin handlers.
pub struct ActionDispatcher {
    registry: Arc<ProviderRegistry>,
    modules: Arc<ModuleSet>,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<ProviderRegistry>, modules: Arc<ModuleSet>) -> Self {
        Self { registry, modules }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn modules(&self) -> &ModuleSet {
        &self.modules
    }

    /// Handler lookup without invocation. Without a plugin name the
    /// last-registered handler wins.
    pub fn action_handler(
        &self,
        kind: PluginActionKind,
        plugin: Option<&str>,
    ) -> Option<(String, Arc<dyn ActionHandler>)> {
        self.registry.plugin_action_handler(kind, plugin)
    }

    /// Invoke a plugin-level action.
    pub async fn plugin_action(
        &self,
        kind: PluginActionKind,
        params: Value,
        opts: DispatchOptions,
    ) -> Result<Value, DispatchError> {
        let (plugin, handler) = match self
            .registry
            .plugin_action_handler(kind, opts.plugin_name.as_deref())
        {
            Some(found) => found,
            None => match opts.default_handler {
                Some(handler) => ("default".to_string(), handler),
                None => {
                    return Err(DispatchError::NoHandler {
                        action: kind.name().to_string(),
                        module_type: None,
                        plugin: opts.plugin_name,
                    })
                }
            },
        };
        self.invoke(
            &plugin,
            kind.name(),
            &kind.input_schema(),
            &kind.output_schema(),
            handler,
            params,
        )
        .await
    }

    /// Environment status across every loaded plugin that reports one,
    /// keyed by plugin name.
    pub async fn environment_statuses(&self) -> Result<BTreeMap<String, Value>, DispatchError> {
        let mut statuses = BTreeMap::new();
        for name in self.registry.loaded_plugins() {
            let Some((plugin, handler)) = self
                .registry
                .plugin_action_handler(PluginActionKind::GetEnvironmentStatus, Some(name))
            else {
                continue;
            };
            let kind = PluginActionKind::GetEnvironmentStatus;
            let status = self
                .invoke(
                    &plugin,
                    kind.name(),
                    &kind.input_schema(),
                    &kind.output_schema(),
                    handler,
                    json!({}),
                )
                .await?;
            statuses.insert(name.clone(), status);
        }
        Ok(statuses)
    }

    /// Invoke a module action; the module type selects the handler family.
    pub async fn module_action(
        &self,
        kind: ModuleActionKind,
        module_name: &str,
        params: Value,
        opts: DispatchOptions,
    ) -> Result<Value, DispatchError> {
        let module = self
            .modules
            .get(module_name)
            .ok_or_else(|| DispatchError::UnknownParameter {
                kind: "module",
                name: module_name.to_string(),
            })?;
        let mut params = as_object(params, kind.name())?;
        params.insert("module".to_string(), to_value(module)?);
        self.module_action_for_type(kind, &module.module_type, Value::Object(params), opts)
            .await
    }

    /// Invoke a service action; the owning module supplies the module type.
    pub async fn service_action(
        &self,
        kind: ModuleActionKind,
        service_name: &str,
        params: Value,
        opts: DispatchOptions,
    ) -> Result<Value, DispatchError> {
        let module = self.modules.service_owner(service_name).ok_or_else(|| {
            DispatchError::UnknownParameter {
                kind: "service",
                name: service_name.to_string(),
            }
        })?;
        let service = self
            .modules
            .service(service_name)
            .expect("owner implies service");
        let mut params = as_object(params, kind.name())?;
        params.insert("service".to_string(), to_value(service)?);
        params.insert("module".to_string(), to_value(module)?);
        self.module_action_for_type(kind, &module.module_type, Value::Object(params), opts)
            .await
    }

    /// Invoke a task action; the owning module supplies the module type.
    pub async fn task_action(
        &self,
        kind: ModuleActionKind,
        task_name: &str,
        params: Value,
        opts: DispatchOptions,
    ) -> Result<Value, DispatchError> {
        let module =
            self.modules
                .task_owner(task_name)
                .ok_or_else(|| DispatchError::UnknownParameter {
                    kind: "task",
                    name: task_name.to_string(),
                })?;
        let task = self.modules.task(task_name).expect("owner implies task");
        let mut params = as_object(params, kind.name())?;
        params.insert("task".to_string(), to_value(task)?);
        params.insert("module".to_string(), to_value(module)?);
        self.module_action_for_type(kind, &module.module_type, Value::Object(params), opts)
            .await
    }

    async fn module_action_for_type(
        &self,
        kind: ModuleActionKind,
        module_type: &str,
        params: Value,
        opts: DispatchOptions,
    ) -> Result<Value, DispatchError> {
        let found = self
            .registry
            .module_action_handler(kind, module_type, opts.plugin_name.as_deref());
        let (plugin, handler) = match found {
            Some(found) => found,
            None => {
                let fallback = opts
                    .default_handler
                    .or_else(|| self.registry.default_module_handler(kind));
                match fallback {
                    Some(handler) => ("default".to_string(), handler),
                    None => {
                        return Err(DispatchError::NoHandler {
                            action: kind.name().to_string(),
                            module_type: Some(module_type.to_string()),
                            plugin: opts.plugin_name,
                        })
                    }
                }
            }
        };
        self.invoke(
            &plugin,
            kind.name(),
            &kind.input_schema(),
            &kind.output_schema(),
            handler,
            params,
        )
        .await
    }

    async fn invoke(
        &self,
        plugin: &str,
        action: &str,
        input_schema: &Value,
        output_schema: &Value,
        handler: Arc<dyn ActionHandler>,
        params: Value,
    ) -> Result<Value, DispatchError> {
        validate_schema(&params, input_schema, &format!("input of action '{}'", action))?;

        let ctx = PluginContext {
            plugin_name: plugin.to_string(),
            project_name: self.registry.project_name().to_string(),
        };
        tracing::debug!(plugin, action, "dispatching action");
        let output = handler.call(params, ctx).await?;

        validate_schema(
            &output,
            output_schema,
            &format!("output of action '{}' (plugin '{}')", action, plugin),
        )?;
        Ok(output)
    }

    // Typed entry points.

    pub async fn configure_provider(
        &self,
        plugin: &str,
        config: Value,
    ) -> Result<Value, DispatchError> {
        self.plugin_action(
            PluginActionKind::ConfigureProvider,
            json!({ "config": config }),
            DispatchOptions::plugin(plugin),
        )
        .await
    }

    pub async fn prepare_environment(&self, plugin: Option<&str>) -> Result<Value, DispatchError> {
        self.plugin_action(
            PluginActionKind::PrepareEnvironment,
            json!({}),
            DispatchOptions {
                plugin_name: plugin.map(str::to_string),
                ..DispatchOptions::default()
            },
        )
        .await
    }

    pub async fn cleanup_environment(&self, plugin: Option<&str>) -> Result<Value, DispatchError> {
        self.plugin_action(
            PluginActionKind::CleanupEnvironment,
            json!({}),
            DispatchOptions {
                plugin_name: plugin.map(str::to_string),
                ..DispatchOptions::default()
            },
        )
        .await
    }

    pub async fn get_secret(&self, plugin: Option<&str>, key: &str) -> Result<Value, DispatchError> {
        self.plugin_action(
            PluginActionKind::GetSecret,
            json!({ "key": key }),
            DispatchOptions {
                plugin_name: plugin.map(str::to_string),
                ..DispatchOptions::default()
            },
        )
        .await
    }

    pub async fn set_secret(
        &self,
        plugin: Option<&str>,
        key: &str,
        value: &str,
    ) -> Result<Value, DispatchError> {
        self.plugin_action(
            PluginActionKind::SetSecret,
            json!({ "key": key, "value": value }),
            DispatchOptions {
                plugin_name: plugin.map(str::to_string),
                ..DispatchOptions::default()
            },
        )
        .await
    }

    pub async fn delete_secret(
        &self,
        plugin: Option<&str>,
        key: &str,
    ) -> Result<Value, DispatchError> {
        self.plugin_action(
            PluginActionKind::DeleteSecret,
            json!({ "key": key }),
            DispatchOptions {
                plugin_name: plugin.map(str::to_string),
                ..DispatchOptions::default()
            },
        )
        .await
    }

    pub async fn configure_module(&self, module: &str) -> Result<Value, DispatchError> {
        self.module_action(
            ModuleActionKind::Configure,
            module,
            Value::Null,
            DispatchOptions::default(),
        )
        .await
    }

    pub async fn build_module(&self, module: &str, params: Value) -> Result<Value, DispatchError> {
        self.module_action(ModuleActionKind::Build, module, params, DispatchOptions::default())
            .await
    }

    pub async fn get_build_status(&self, module: &str) -> Result<Value, DispatchError> {
        self.module_action(
            ModuleActionKind::GetBuildStatus,
            module,
            Value::Null,
            DispatchOptions::default(),
        )
        .await
    }

    pub async fn push_module(&self, module: &str) -> Result<Value, DispatchError> {
        self.module_action(
            ModuleActionKind::PushModule,
            module,
            Value::Null,
            DispatchOptions::default(),
        )
        .await
    }

    pub async fn publish_module(&self, module: &str) -> Result<Value, DispatchError> {
        self.module_action(
            ModuleActionKind::PublishModule,
            module,
            Value::Null,
            DispatchOptions::default(),
        )
        .await
    }

    pub async fn run_module(&self, module: &str, params: Value) -> Result<Value, DispatchError> {
        self.module_action(ModuleActionKind::RunModule, module, params, DispatchOptions::default())
            .await
    }

    pub async fn test_module(&self, module: &str, params: Value) -> Result<Value, DispatchError> {
        self.module_action(ModuleActionKind::TestModule, module, params, DispatchOptions::default())
            .await
    }

    pub async fn get_test_result(
        &self,
        module: &str,
        params: Value,
    ) -> Result<Value, DispatchError> {
        self.module_action(
            ModuleActionKind::GetTestResult,
            module,
            params,
            DispatchOptions::default(),
        )
        .await
    }

    pub async fn get_service_status(&self, service: &str) -> Result<Value, DispatchError> {
        self.service_action(
            ModuleActionKind::GetServiceStatus,
            service,
            Value::Null,
            DispatchOptions::default(),
        )
        .await
    }

    pub async fn deploy_service(&self, service: &str, params: Value) -> Result<Value, DispatchError> {
        self.service_action(
            ModuleActionKind::DeployService,
            service,
            params,
            DispatchOptions::default(),
        )
        .await
    }

    pub async fn delete_service(&self, service: &str) -> Result<Value, DispatchError> {
        self.service_action(
            ModuleActionKind::DeleteService,
            service,
            Value::Null,
            DispatchOptions::default(),
        )
        .await
    }

    pub async fn exec_in_service(
        &self,
        service: &str,
        command: Vec<String>,
    ) -> Result<Value, DispatchError> {
        self.service_action(
            ModuleActionKind::ExecInService,
            service,
            json!({ "command": command }),
            DispatchOptions::default(),
        )
        .await
    }

    pub async fn get_service_logs(&self, service: &str) -> Result<Value, DispatchError> {
        self.service_action(
            ModuleActionKind::GetServiceLogs,
            service,
            Value::Null,
            DispatchOptions::default(),
        )
        .await
    }

    pub async fn run_service(&self, service: &str) -> Result<Value, DispatchError> {
        self.service_action(
            ModuleActionKind::RunService,
            service,
            Value::Null,
            DispatchOptions::default(),
        )
        .await
    }

    pub async fn hot_reload_service(&self, service: &str) -> Result<Value, DispatchError> {
        self.service_action(
            ModuleActionKind::HotReloadService,
            service,
            Value::Null,
            DispatchOptions::default(),
        )
        .await
    }

    pub async fn run_task(&self, task: &str, params: Value) -> Result<Value, DispatchError> {
        self.task_action(ModuleActionKind::RunTask, task, params, DispatchOptions::default())
            .await
    }
}

fn as_object(params: Value, action: &str) -> Result<Map<String, Value>, DispatchError> {
    match params {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        _ => Err(DispatchError::InvalidParams {
            action: action.to_string(),
        }),
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, DispatchError> {
    serde_json::to_value(value).map_err(|e| DispatchError::InvalidParams {
        action: format!("serialize: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use trellis_core::types::{Module, ServiceConfig, TaskConfig};
    use trellis_spi::{handler_fn, PluginDescriptor, PluginFactoryParams};

    fn sample_modules() -> Arc<ModuleSet> {
        let mut api = Module::new("api", "container", PathBuf::from("/p/api"));
        api.service_configs.push(ServiceConfig::new("api-svc", "api"));
        api.task_configs.push(TaskConfig::new("migrate", "api"));
        Arc::new(ModuleSet::new(vec![api]).expect("set"))
    }

    fn dispatcher_with(registry: ProviderRegistry) -> ActionDispatcher {
        ActionDispatcher::new(Arc::new(registry), sample_modules())
    }

    fn prepare_plugin(name: &'static str) -> Arc<dyn trellis_spi::PluginFactory> {
        Arc::new(move |_params: &PluginFactoryParams| {
            Ok(PluginDescriptor::new(name).add_action(
                PluginActionKind::PrepareEnvironment,
                handler_fn(move |_p, ctx| async move {
                    Ok(json!({"outputs": {"plugin": ctx.plugin_name}}))
                }),
            ))
        })
    }

    #[tokio::test]
    async fn test_last_registered_plugin_wins_unless_named() {
        let mut registry = ProviderRegistry::new("demo");
        registry.register_factory("p1", prepare_plugin("p1"));
        registry.register_factory("p2", prepare_plugin("p2"));
        registry.load("p1", Value::Null).expect("p1");
        registry.load("p2", Value::Null).expect("p2");
        let dispatcher = dispatcher_with(registry);

        let (plugin, _) = dispatcher
            .action_handler(PluginActionKind::PrepareEnvironment, None)
            .expect("handler");
        assert_eq!(plugin, "p2");

        let out = dispatcher.prepare_environment(Some("p1")).await.expect("ok");
        assert_eq!(out["outputs"]["plugin"], json!("p1"));
    }

    #[tokio::test]
    async fn test_missing_handler_without_default_errors() {
        let dispatcher = dispatcher_with(ProviderRegistry::new("demo"));
        let result = dispatcher.prepare_environment(None).await;
        assert!(matches!(result, Err(DispatchError::NoHandler { .. })));
    }

    #[tokio::test]
    async fn test_caller_default_handler_is_used() {
        let dispatcher = dispatcher_with(ProviderRegistry::new("demo"));
        let out = dispatcher
            .plugin_action(
                PluginActionKind::PrepareEnvironment,
                json!({}),
                DispatchOptions::with_default(handler_fn(|_p, _ctx| async {
                    Ok(json!({"outputs": {}}))
                })),
            )
            .await
            .expect("ok");
        assert_eq!(out, json!({"outputs": {}}));
    }

    #[tokio::test]
    async fn test_builtin_module_defaults_apply() {
        let dispatcher = dispatcher_with(ProviderRegistry::new("demo"));
        assert_eq!(
            dispatcher.push_module("api").await.expect("ok"),
            json!({"pushed": false})
        );
        assert_eq!(
            dispatcher.publish_module("api").await.expect("ok"),
            json!({"published": false})
        );
        assert_eq!(
            dispatcher.get_test_result("api", Value::Null).await.expect("ok"),
            Value::Null
        );
    }

    #[tokio::test]
    async fn test_service_action_derives_module_type() {
        let mut registry = ProviderRegistry::new("demo");
        registry.register_factory(
            "container",
            Arc::new(|_params: &PluginFactoryParams| {
                Ok(PluginDescriptor::new("container").add_module_action(
                    "container",
                    ModuleActionKind::DeployService,
                    handler_fn(|params, _ctx| async move {
                        Ok(json!({
                            "deployed": params["service"]["name"],
                            "from": params["module"]["name"],
                        }))
                    }),
                ))
            }),
        );
        registry.load("container", Value::Null).expect("load");
        let dispatcher = dispatcher_with(registry);

        let out = dispatcher
            .deploy_service("api-svc", Value::Null)
            .await
            .expect("ok");
        assert_eq!(out["deployed"], json!("api-svc"));
        assert_eq!(out["from"], json!("api"));
    }

    #[tokio::test]
    async fn test_unknown_names_are_parameter_errors() {
        let dispatcher = dispatcher_with(ProviderRegistry::new("demo"));
        assert!(matches!(
            dispatcher.deploy_service("ghost", Value::Null).await,
            Err(DispatchError::UnknownParameter { kind: "service", .. })
        ));
        assert!(matches!(
            dispatcher.build_module("ghost", Value::Null).await,
            Err(DispatchError::UnknownParameter { kind: "module", .. })
        ));
        assert!(matches!(
            dispatcher.run_task("ghost", Value::Null).await,
            Err(DispatchError::UnknownParameter { kind: "task", .. })
        ));
    }

    #[tokio::test]
    async fn test_output_schema_violation_is_a_plugin_error() {
        let mut registry = ProviderRegistry::new("demo");
        registry.register_factory(
            "bad",
            Arc::new(|_params: &PluginFactoryParams| {
                Ok(PluginDescriptor::new("bad").add_module_action(
                    "container",
                    ModuleActionKind::PushModule,
                    handler_fn(|_p, _ctx| async { Ok(json!({"pushed": "yes"})) }),
                ))
            }),
        );
        registry.load("bad", Value::Null).expect("load");
        let dispatcher = dispatcher_with(registry);

        match dispatcher.push_module("api").await {
            Err(DispatchError::Plugin(PluginError::Schema { path, .. })) => {
                assert_eq!(path, "$.pushed");
            }
            other => panic!("unexpected: {:?}", other.map(|v| v.to_string())),
        }
    }

    #[tokio::test]
    async fn test_environment_statuses_fan_out() {
        let mut registry = ProviderRegistry::new("demo");
        for name in ["p1", "p2"] {
            registry.register_factory(
                name,
                Arc::new(move |_params: &PluginFactoryParams| {
                    Ok(PluginDescriptor::new(name).add_action(
                        PluginActionKind::GetEnvironmentStatus,
                        handler_fn(|_p, _ctx| async { Ok(json!({"ready": true})) }),
                    ))
                }),
            );
        }
        registry.load("p1", Value::Null).expect("p1");
        registry.load("p2", Value::Null).expect("p2");
        let dispatcher = dispatcher_with(registry);

        let statuses = dispatcher.environment_statuses().await.expect("ok");
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses["p1"], json!({"ready": true}));
        assert_eq!(statuses["p2"], json!({"ready": true}));
    }
}
