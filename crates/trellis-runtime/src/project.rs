//! Module resolution.
//!
//! Turns parsed module declarations into fully-resolved modules: template
//! strings are evaluated against the module context, then each module is
//! passed through its provider's `configure` action.

use serde_json::Value;

use trellis_actions::{ActionDispatcher, DispatchError};
use trellis_config::ModuleDeclaration;
use trellis_context::{TemplateEngine, TemplateError};
use trellis_core::types::{Module, ServiceConfig, TaskConfig, TestConfig};

/// Resolve template expressions in every declaration and build modules.
///
/// Paths are absolute already (the loader sets them); specs, build commands
/// and nested service/task/test specs are resolved here.
pub async fn resolve_modules(
    declarations: &[ModuleDeclaration],
    engine: &TemplateEngine,
) -> Result<Vec<Module>, TemplateError> {
    let mut modules = Vec::with_capacity(declarations.len());
    for declaration in declarations {
        modules.push(resolve_module(declaration, engine).await?);
    }
    Ok(modules)
}

async fn resolve_module(
    declaration: &ModuleDeclaration,
    engine: &TemplateEngine,
) -> Result<Module, TemplateError> {
    let mut module = Module::new(
        &declaration.name,
        &declaration.module_type,
        declaration.path.clone(),
    );
    module.description = declaration.description.clone();
    module.repository_url = declaration.repository_url.clone();
    module.allow_publish = declaration.allow_publish;

    module.build.dependencies = declaration.build.dependencies.clone();
    for command in &declaration.build.command {
        let resolved = engine.resolve_string(command).await?;
        module.build.command.push(stringify(resolved));
    }

    let spec = Value::Object(
        declaration
            .spec
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    module.spec = engine.resolve_value(&spec).await?;

    for service in &declaration.services {
        let mut config = ServiceConfig::new(&service.name, &declaration.name);
        config.source_module_name = service.source_module.clone();
        config.dependencies = service.dependencies.clone();
        config.hot_reloadable = service.hot_reloadable;
        config.spec = engine.resolve_value(&service.spec).await?;
        module.service_configs.push(config);
    }

    for task in &declaration.tasks {
        let mut config = TaskConfig::new(&task.name, &declaration.name);
        config.dependencies = task.dependencies.clone();
        config.timeout = task.timeout_duration();
        config.spec = engine.resolve_value(&task.spec).await?;
        module.task_configs.push(config);
    }

    for test in &declaration.tests {
        let mut config = TestConfig::new(&test.name, &declaration.name);
        config.dependencies = test.dependencies.clone();
        config.timeout = test.timeout.map(std::time::Duration::from_secs);
        config.spec = engine.resolve_value(&test.spec).await?;
        module.test_configs.push(config);
    }

    tracing::debug!(module = %module.name, "module resolved");
    Ok(module)
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Run every module through its provider's `configure` action and return
/// the configured modules. The default handler is the identity.
pub async fn configure_modules(
    dispatcher: &ActionDispatcher,
) -> Result<Vec<Module>, DispatchError> {
    let names: Vec<String> = dispatcher.modules().names().map(str::to_string).collect();
    let mut configured = Vec::with_capacity(names.len());
    for name in names {
        let output = dispatcher.configure_module(&name).await?;
        let module: Module = serde_json::from_value(output).map_err(|e| {
            DispatchError::Plugin(trellis_spi::PluginError::Handler {
                plugin: "configure".to_string(),
                action: "configure".to_string(),
                reason: format!("invalid configured module '{}': {}", name, e),
            })
        })?;
        configured.push(module);
    }
    Ok(configured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use serde_json::json;
    use trellis_actions::ProviderRegistry;
    use trellis_context::{ModuleContext, ModuleContextEntry, ProjectContext, ProviderContext};
    use trellis_core::types::ModuleSet;

    fn declaration(name: &str, spec: &[(&str, Value)]) -> ModuleDeclaration {
        ModuleDeclaration {
            module_type: "container".to_string(),
            name: name.to_string(),
            description: None,
            repository_url: None,
            allow_publish: false,
            build: Default::default(),
            services: Vec::new(),
            tasks: Vec::new(),
            tests: Vec::new(),
            spec: spec
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            path: PathBuf::from("/p").join(name),
        }
    }

    #[tokio::test]
    async fn test_resolve_modules_evaluates_spec_templates() {
        let provider = ProviderContext::new(ProjectContext::new("demo"), "dev")
            .with_variables(BTreeMap::from([("tag".to_string(), json!("v2"))]));
        let engine = TemplateEngine::new(provider.build());

        let decl = declaration("api", &[("image", json!("registry/api:${variables.tag}"))]);
        let modules = resolve_modules(&[decl], &engine).await.expect("resolve");

        assert_eq!(modules[0].spec["image"], json!("registry/api:v2"));
        assert!(modules[0].path.is_absolute());
    }

    #[tokio::test]
    async fn test_cross_module_output_cycle_is_rejected() {
        // Two modules whose build commands reference each other's outputs.
        let provider = ProviderContext::new(ProjectContext::new("demo"), "dev");
        let mut context = ModuleContext::new(provider);
        context.add_module(
            ModuleContextEntry::new("module-a", Path::new("/p/module-a"), Path::new("/b/module-a"))
                .with_outputs(json!({"command": "${modules.module-b.outputs.command}"})),
        );
        context.add_module(
            ModuleContextEntry::new("module-b", Path::new("/p/module-b"), Path::new("/b/module-b"))
                .with_outputs(json!({"command": "${modules.module-a.outputs.command}"})),
        );
        let engine = TemplateEngine::new(context.build());

        let mut decl = declaration("module-a", &[]);
        decl.build.command = vec!["${modules.module-b.outputs.command}".to_string()];

        match resolve_modules(&[decl], &engine).await {
            Err(TemplateError::CircularReference { cycle }) => {
                assert!(cycle
                    .iter()
                    .any(|p| p.starts_with("modules.module-a")));
                assert!(cycle
                    .iter()
                    .any(|p| p.starts_with("modules.module-b")));
            }
            other => panic!("expected cycle, got {:?}", other.map(|m| m.len())),
        }
    }

    #[tokio::test]
    async fn test_configure_modules_defaults_to_identity() {
        let mut api = Module::new("api", "container", PathBuf::from("/p/api"));
        api.service_configs.push(ServiceConfig::new("api-svc", "api"));
        let modules = Arc::new(ModuleSet::new(vec![api]).expect("set"));
        let registry = Arc::new(ProviderRegistry::new("demo"));
        let dispatcher = ActionDispatcher::new(registry, modules);

        let configured = configure_modules(&dispatcher).await.expect("configure");
        assert_eq!(configured.len(), 1);
        assert_eq!(configured[0].name, "api");
        assert_eq!(configured[0].service_configs.len(), 1);
    }
}
