//! Concrete task kinds.
//!
//! These are the heterogeneous units of work the scheduler processes:
//! provider-prepare, build, push, deploy, run-task, test and hot-reload.
//! Each derives its dependencies from the config graph and calls the
//! action dispatcher in its body.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use trellis_actions::ActionDispatcher;
use trellis_core::graph::ConfigGraph;
use trellis_core::types::{Module, ModuleVersion, Provider, ServiceConfig, TaskConfig, TestConfig};

use crate::task::{hash_params, GraphTask, TaskError, TaskResults};

const BUILD_CONCURRENCY: usize = 4;
const PUSH_CONCURRENCY: usize = 4;
const TEST_CONCURRENCY: usize = 5;

/// Builds task instances wired to the config graph and dispatcher.
pub struct TaskFactory {
    graph: Arc<ConfigGraph>,
    dispatcher: Arc<ActionDispatcher>,
    versions: BTreeMap<String, ModuleVersion>,
    providers: BTreeMap<String, Provider>,
}

impl TaskFactory {
    pub fn new(graph: Arc<ConfigGraph>, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self {
            graph,
            dispatcher,
            versions: BTreeMap::new(),
            providers: BTreeMap::new(),
        }
    }

    /// Resolved module versions, keyed by module name.
    pub fn with_versions(mut self, versions: BTreeMap<String, ModuleVersion>) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_providers(mut self, providers: Vec<Provider>) -> Self {
        self.providers = providers
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        self
    }

    fn module_version(&self, module: &str) -> ModuleVersion {
        self.versions
            .get(module)
            .cloned()
            .unwrap_or_else(ModuleVersion::null)
    }

    fn module(&self, name: &str) -> Result<Module, TaskError> {
        self.graph
            .modules()
            .get(name)
            .cloned()
            .ok_or_else(|| TaskError::Dependencies(format!("unknown module '{}'", name)))
    }

    pub fn build_task(self: &Arc<Self>, module: &str, force: bool) -> Result<Arc<BuildTask>, TaskError> {
        Ok(Arc::new(BuildTask {
            factory: self.clone(),
            module: self.module(module)?,
            version: self.module_version(module),
            force,
        }))
    }

    pub fn push_task(self: &Arc<Self>, module: &str, force: bool) -> Result<Arc<PushTask>, TaskError> {
        Ok(Arc::new(PushTask {
            factory: self.clone(),
            module: self.module(module)?,
            version: self.module_version(module),
            force,
        }))
    }

    pub fn deploy_task(
        self: &Arc<Self>,
        service: &str,
        force: bool,
    ) -> Result<Arc<DeployTask>, TaskError> {
        let config = self
            .graph
            .modules()
            .service(service)
            .cloned()
            .ok_or_else(|| TaskError::Dependencies(format!("unknown service '{}'", service)))?;
        let version = self.module_version(config.source_module());
        Ok(Arc::new(DeployTask {
            factory: self.clone(),
            service: config,
            version,
            force,
        }))
    }

    pub fn hot_reload_task(self: &Arc<Self>, service: &str) -> Result<Arc<HotReloadTask>, TaskError> {
        let config = self
            .graph
            .modules()
            .service(service)
            .cloned()
            .ok_or_else(|| TaskError::Dependencies(format!("unknown service '{}'", service)))?;
        let version = self.module_version(config.source_module());
        Ok(Arc::new(HotReloadTask {
            factory: self.clone(),
            service: config,
            version,
        }))
    }

    pub fn run_task_task(self: &Arc<Self>, task: &str, force: bool) -> Result<Arc<RunTaskTask>, TaskError> {
        let config = self
            .graph
            .modules()
            .task(task)
            .cloned()
            .ok_or_else(|| TaskError::Dependencies(format!("unknown task '{}'", task)))?;
        let version = self.module_version(&config.module_name);
        Ok(Arc::new(RunTaskTask {
            factory: self.clone(),
            task: config,
            version,
            force,
        }))
    }

    pub fn test_task(
        self: &Arc<Self>,
        module: &str,
        test: &str,
        force: bool,
    ) -> Result<Arc<TestTask>, TaskError> {
        let config = self
            .module(module)?
            .test_configs
            .iter()
            .find(|t| t.name == test)
            .cloned()
            .ok_or_else(|| {
                TaskError::Dependencies(format!("unknown test '{}.{}'", module, test))
            })?;
        let version = self.module_version(module);
        Ok(Arc::new(TestTask {
            factory: self.clone(),
            test: config,
            version,
            force,
        }))
    }

    pub fn provider_task(self: &Arc<Self>, provider: &str) -> Result<Arc<ResolveProviderTask>, TaskError> {
        let config = self
            .providers
            .get(provider)
            .cloned()
            .ok_or_else(|| TaskError::Dependencies(format!("unknown provider '{}'", provider)))?;
        Ok(Arc::new(ResolveProviderTask {
            factory: self.clone(),
            provider: config,
        }))
    }

    /// Tasks for the declared runtime dependencies of a service, task or
    /// test: running services and completed tasks.
    fn runtime_dependencies(
        self: &Arc<Self>,
        names: &[String],
        force: bool,
    ) -> Result<Vec<Arc<dyn GraphTask>>, TaskError> {
        let mut out: Vec<Arc<dyn GraphTask>> = Vec::new();
        for name in names {
            if self.graph.modules().service(name).is_some() {
                out.push(self.deploy_task(name, force)?);
            } else if self.graph.modules().task(name).is_some() {
                out.push(self.run_task_task(name, force)?);
            } else {
                return Err(TaskError::Dependencies(format!(
                    "unknown dependency '{}'",
                    name
                )));
            }
        }
        Ok(out)
    }
}

/// Build a module's artifact.
pub struct BuildTask {
    factory: Arc<TaskFactory>,
    module: Module,
    version: ModuleVersion,
    force: bool,
}

#[async_trait]
impl GraphTask for BuildTask {
    fn task_type(&self) -> &str {
        "build"
    }

    fn name(&self) -> String {
        self.module.name.clone()
    }

    fn version(&self) -> ModuleVersion {
        self.version.clone()
    }

    fn force(&self) -> bool {
        self.force
    }

    fn concurrency_limit(&self) -> usize {
        BUILD_CONCURRENCY
    }

    fn params_hash(&self) -> Option<String> {
        Some(hash_params(&json!({
            "force": self.force,
            "version": self.version.version_string,
        })))
    }

    async fn dependencies(&self) -> Result<Vec<Arc<dyn GraphTask>>, TaskError> {
        let mut deps: Vec<Arc<dyn GraphTask>> = Vec::new();
        for dep in &self.module.build.dependencies {
            deps.push(self.factory.build_task(&dep.name, self.force)?);
        }
        Ok(deps)
    }

    async fn process(&self, _deps: &TaskResults) -> Result<Value, TaskError> {
        let status = self
            .factory
            .dispatcher
            .get_build_status(&self.module.name)
            .await?;
        if !self.force && status.get("ready").and_then(Value::as_bool) == Some(true) {
            return Ok(json!({"fresh": false, "status": status}));
        }
        let result = self
            .factory
            .dispatcher
            .build_module(&self.module.name, json!({"force": self.force}))
            .await?;
        Ok(json!({"fresh": true, "details": result}))
    }
}

/// Push a built artifact to its registry.
pub struct PushTask {
    factory: Arc<TaskFactory>,
    module: Module,
    version: ModuleVersion,
    force: bool,
}

#[async_trait]
impl GraphTask for PushTask {
    fn task_type(&self) -> &str {
        "push"
    }

    fn name(&self) -> String {
        self.module.name.clone()
    }

    fn version(&self) -> ModuleVersion {
        self.version.clone()
    }

    fn force(&self) -> bool {
        self.force
    }

    fn concurrency_limit(&self) -> usize {
        PUSH_CONCURRENCY
    }

    fn params_hash(&self) -> Option<String> {
        Some(hash_params(&json!({
            "force": self.force,
            "version": self.version.version_string,
        })))
    }

    async fn dependencies(&self) -> Result<Vec<Arc<dyn GraphTask>>, TaskError> {
        Ok(vec![self.factory.build_task(&self.module.name, self.force)?])
    }

    async fn process(&self, _deps: &TaskResults) -> Result<Value, TaskError> {
        Ok(self.factory.dispatcher.push_module(&self.module.name).await?)
    }
}

/// Deploy a service.
pub struct DeployTask {
    factory: Arc<TaskFactory>,
    service: ServiceConfig,
    version: ModuleVersion,
    force: bool,
}

#[async_trait]
impl GraphTask for DeployTask {
    fn task_type(&self) -> &str {
        "deploy"
    }

    fn name(&self) -> String {
        self.service.name.clone()
    }

    fn version(&self) -> ModuleVersion {
        self.version.clone()
    }

    fn force(&self) -> bool {
        self.force
    }

    fn params_hash(&self) -> Option<String> {
        Some(hash_params(&json!({
            "force": self.force,
            "version": self.version.version_string,
        })))
    }

    async fn dependencies(&self) -> Result<Vec<Arc<dyn GraphTask>>, TaskError> {
        let mut deps: Vec<Arc<dyn GraphTask>> = vec![self
            .factory
            .build_task(self.service.source_module(), self.force)?];
        deps.extend(
            self.factory
                .runtime_dependencies(&self.service.dependencies, self.force)?,
        );
        Ok(deps)
    }

    async fn process(&self, _deps: &TaskResults) -> Result<Value, TaskError> {
        let status = self
            .factory
            .dispatcher
            .get_service_status(&self.service.name)
            .await?;
        let up_to_date = status.get("state").and_then(Value::as_str) == Some("ready")
            && status.get("version").and_then(Value::as_str)
                == Some(self.version.version_string.as_str());
        if !self.force && up_to_date {
            return Ok(json!({"fresh": false, "status": status}));
        }
        let result = self
            .factory
            .dispatcher
            .deploy_service(&self.service.name, json!({"force": self.force}))
            .await?;
        Ok(json!({"fresh": true, "details": result}))
    }
}

/// Hot-reload a running service in place of a full deploy.
pub struct HotReloadTask {
    factory: Arc<TaskFactory>,
    service: ServiceConfig,
    version: ModuleVersion,
}

#[async_trait]
impl GraphTask for HotReloadTask {
    fn task_type(&self) -> &str {
        "hot-reload"
    }

    fn name(&self) -> String {
        self.service.name.clone()
    }

    fn version(&self) -> ModuleVersion {
        self.version.clone()
    }

    async fn dependencies(&self) -> Result<Vec<Arc<dyn GraphTask>>, TaskError> {
        Ok(vec![self
            .factory
            .build_task(self.service.source_module(), false)?])
    }

    async fn process(&self, _deps: &TaskResults) -> Result<Value, TaskError> {
        Ok(self
            .factory
            .dispatcher
            .hot_reload_service(&self.service.name)
            .await?)
    }
}

/// Run a one-shot task, enforcing its own timeout.
pub struct RunTaskTask {
    factory: Arc<TaskFactory>,
    task: TaskConfig,
    version: ModuleVersion,
    force: bool,
}

#[async_trait]
impl GraphTask for RunTaskTask {
    fn task_type(&self) -> &str {
        "task"
    }

    fn name(&self) -> String {
        self.task.name.clone()
    }

    fn version(&self) -> ModuleVersion {
        self.version.clone()
    }

    fn force(&self) -> bool {
        self.force
    }

    fn params_hash(&self) -> Option<String> {
        Some(hash_params(&json!({
            "force": self.force,
            "version": self.version.version_string,
        })))
    }

    async fn dependencies(&self) -> Result<Vec<Arc<dyn GraphTask>>, TaskError> {
        let mut deps: Vec<Arc<dyn GraphTask>> = vec![self
            .factory
            .build_task(&self.task.module_name, self.force)?];
        deps.extend(
            self.factory
                .runtime_dependencies(&self.task.dependencies, self.force)?,
        );
        Ok(deps)
    }

    async fn process(&self, _deps: &TaskResults) -> Result<Value, TaskError> {
        let call = self
            .factory
            .dispatcher
            .run_task(&self.task.name, json!({}));
        match self.task.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, call).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(TaskError::Timeout {
                    key: self.key(),
                    seconds: timeout.as_secs(),
                }),
            },
            None => Ok(call.await?),
        }
    }
}

/// Run a module's test suite.
pub struct TestTask {
    factory: Arc<TaskFactory>,
    test: TestConfig,
    version: ModuleVersion,
    force: bool,
}

#[async_trait]
impl GraphTask for TestTask {
    fn task_type(&self) -> &str {
        "test"
    }

    fn name(&self) -> String {
        self.test.key()
    }

    fn version(&self) -> ModuleVersion {
        self.version.clone()
    }

    fn force(&self) -> bool {
        self.force
    }

    fn concurrency_limit(&self) -> usize {
        TEST_CONCURRENCY
    }

    fn params_hash(&self) -> Option<String> {
        Some(hash_params(&json!({
            "force": self.force,
            "version": self.version.version_string,
        })))
    }

    async fn dependencies(&self) -> Result<Vec<Arc<dyn GraphTask>>, TaskError> {
        let mut deps: Vec<Arc<dyn GraphTask>> = vec![self
            .factory
            .build_task(&self.test.module_name, self.force)?];
        deps.extend(
            self.factory
                .runtime_dependencies(&self.test.dependencies, self.force)?,
        );
        Ok(deps)
    }

    async fn process(&self, _deps: &TaskResults) -> Result<Value, TaskError> {
        let params = json!({
            "name": self.test.name,
            "version": self.version.version_string,
        });
        let previous = self
            .factory
            .dispatcher
            .get_test_result(&self.test.module_name, params.clone())
            .await?;
        if !self.force && !previous.is_null() {
            return Ok(json!({"fresh": false, "result": previous}));
        }
        let result = self
            .factory
            .dispatcher
            .test_module(&self.test.module_name, params)
            .await?;
        Ok(json!({"fresh": true, "result": result}))
    }
}

/// Prepare a provider's environment; its outputs become available to
/// templates afterwards.
pub struct ResolveProviderTask {
    factory: Arc<TaskFactory>,
    provider: Provider,
}

#[async_trait]
impl GraphTask for ResolveProviderTask {
    fn task_type(&self) -> &str {
        "provider"
    }

    fn name(&self) -> String {
        self.provider.name.clone()
    }

    async fn dependencies(&self) -> Result<Vec<Arc<dyn GraphTask>>, TaskError> {
        let mut deps: Vec<Arc<dyn GraphTask>> = Vec::new();
        for dep in &self.provider.dependencies {
            deps.push(self.factory.provider_task(dep)?);
        }
        Ok(deps)
    }

    async fn process(&self, _deps: &TaskResults) -> Result<Value, TaskError> {
        Ok(self
            .factory
            .dispatcher
            .prepare_environment(Some(&self.provider.name))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use trellis_actions::ProviderRegistry;
    use trellis_core::types::ModuleSet;
    use trellis_spi::{handler_fn, ModuleActionKind, PluginDescriptor, PluginFactoryParams};

    fn sample_factory() -> Arc<TaskFactory> {
        let mut lib = Module::new("lib", "container", PathBuf::from("/p/lib"));
        lib.test_configs.push(TestConfig::new("unit", "lib"));
        let mut api = Module::new("api", "container", PathBuf::from("/p/api"));
        api.build.dependencies.push(trellis_core::types::BuildDependency {
            name: "lib".to_string(),
            copy: Vec::new(),
        });
        let mut svc = ServiceConfig::new("api-svc", "api");
        svc.dependencies.push("migrate".to_string());
        api.service_configs.push(svc);
        api.task_configs.push(TaskConfig::new("migrate", "api"));

        let modules = Arc::new(ModuleSet::new(vec![lib, api]).expect("set"));
        let graph = Arc::new(ConfigGraph::new((*modules).clone()).expect("graph"));

        let mut registry = ProviderRegistry::new("demo");
        registry.register_factory(
            "container",
            Arc::new(|_p: &PluginFactoryParams| {
                Ok(PluginDescriptor::new("container")
                    .add_module_action(
                        "container",
                        ModuleActionKind::Build,
                        handler_fn(|_p, _c| async { Ok(json!({"buildLog": "ok"})) }),
                    )
                    .add_module_action(
                        "container",
                        ModuleActionKind::DeployService,
                        handler_fn(|_p, _c| async { Ok(json!({"state": "ready"})) }),
                    )
                    .add_module_action(
                        "container",
                        ModuleActionKind::GetServiceStatus,
                        handler_fn(|_p, _c| async { Ok(json!({"state": "missing"})) }),
                    )
                    .add_module_action(
                        "container",
                        ModuleActionKind::RunTask,
                        handler_fn(|_p, _c| async { Ok(json!({"success": true})) }),
                    ))
            }),
        );
        registry.load("container", Value::Null).expect("load");
        let dispatcher = Arc::new(ActionDispatcher::new(Arc::new(registry), modules));
        Arc::new(TaskFactory::new(graph, dispatcher))
    }

    #[tokio::test]
    async fn test_build_task_dependencies_follow_build_deps() {
        let factory = sample_factory();
        let task = factory.build_task("api", false).expect("task");
        let deps = task.dependencies().await.expect("deps");
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].base_key(), "build.lib");
    }

    #[tokio::test]
    async fn test_deploy_task_depends_on_build_and_runtime_deps() {
        let factory = sample_factory();
        let task = factory.deploy_task("api-svc", false).expect("task");
        let deps = task.dependencies().await.expect("deps");
        let base_keys: Vec<String> = deps.iter().map(|d| d.base_key()).collect();
        assert!(base_keys.contains(&"build.api".to_string()));
        assert!(base_keys.contains(&"task.migrate".to_string()));
    }

    #[tokio::test]
    async fn test_build_task_runs_when_status_not_ready() {
        let factory = sample_factory();
        // The sample plugin has no get_build_status handler, so the builtin
        // default reports not-ready and the build runs.
        let task = factory.build_task("api", false).expect("task");
        let output = task.process(&TaskResults::new()).await.expect("ok");
        assert_eq!(output["fresh"], json!(true));
        assert_eq!(output["details"]["buildLog"], json!("ok"));
    }

    #[tokio::test]
    async fn test_deploy_task_redeploys_when_missing() {
        let factory = sample_factory();
        let task = factory.deploy_task("api-svc", false).expect("task");
        let output = task.process(&TaskResults::new()).await.expect("ok");
        assert_eq!(output["fresh"], json!(true));
        assert_eq!(output["details"]["state"], json!("ready"));
    }

    #[tokio::test]
    async fn test_task_timeout_is_enforced() {
        let factory = {
            let mut api = Module::new("api", "container", PathBuf::from("/p/api"));
            let mut slow = TaskConfig::new("slow", "api");
            slow.timeout = Some(std::time::Duration::from_secs(0));
            api.task_configs.push(slow);
            let modules = Arc::new(ModuleSet::new(vec![api]).expect("set"));
            let graph = Arc::new(ConfigGraph::new((*modules).clone()).expect("graph"));

            let mut registry = ProviderRegistry::new("demo");
            registry.register_factory(
                "container",
                Arc::new(|_p: &PluginFactoryParams| {
                    Ok(PluginDescriptor::new("container").add_module_action(
                        "container",
                        ModuleActionKind::RunTask,
                        handler_fn(|_p, _c| async {
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                            Ok(json!({"success": true}))
                        }),
                    ))
                }),
            );
            registry.load("container", Value::Null).expect("load");
            let dispatcher = Arc::new(ActionDispatcher::new(Arc::new(registry), modules));
            Arc::new(TaskFactory::new(graph, dispatcher))
        };

        let task = factory.run_task_task("slow", false).expect("task");
        let result = task.process(&TaskResults::new()).await;
        assert!(matches!(result, Err(TaskError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_unknown_names_fail_dependency_resolution() {
        let factory = sample_factory();
        assert!(factory.deploy_task("ghost", false).is_err());
        assert!(factory.run_task_task("ghost", false).is_err());
        assert!(factory.provider_task("ghost").is_err());
    }
}
