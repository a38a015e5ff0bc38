//! Provider registry.
//!
//! Plugin factories are registered by name. Loading a plugin invokes its
//! factory, validates the returned descriptor, merges the provider config
//! with any prior registration for the same name (last-wins for scalars,
//! merge for maps), validates the merged config against the plugin's own
//! schema, and installs the handlers into the dispatch tables.
//!
//! Registration mutates the registry; once scheduling begins the registry
//! is shared immutably.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use trellis_spi::{
    validate_schema, ActionHandler, ModuleActionKind, PluginActionKind, PluginDescriptor,
    PluginError, PluginFactory, PluginFactoryParams,
};

use crate::defaults::install_default_handlers;

/// A loaded, configured plugin.
pub struct LoadedPlugin {
    pub descriptor: PluginDescriptor,
    pub config: Value,
}

struct HandlerEntry {
    plugin: String,
    handler: Arc<dyn ActionHandler>,
}

/// Registry of plugin factories, loaded plugins and dispatch tables.
pub struct ProviderRegistry {
    project_name: String,
    factories: HashMap<String, Arc<dyn PluginFactory>>,
    plugins: HashMap<String, LoadedPlugin>,
    load_order: Vec<String>,
    plugin_handlers: HashMap<PluginActionKind, Vec<HandlerEntry>>,
    module_handlers: HashMap<(String, ModuleActionKind), Vec<HandlerEntry>>,
    default_module_handlers: HashMap<ModuleActionKind, Arc<dyn ActionHandler>>,
}

impl ProviderRegistry {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            factories: HashMap::new(),
            plugins: HashMap::new(),
            load_order: Vec::new(),
            plugin_handlers: HashMap::new(),
            module_handlers: HashMap::new(),
            default_module_handlers: install_default_handlers(),
        }
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// Register (or replace) a plugin factory under `name`.
    pub fn register_factory(&mut self, name: impl Into<String>, factory: Arc<dyn PluginFactory>) {
        self.factories.insert(name.into(), factory);
    }

    /// Load the named plugin with the given provider config.
    pub fn load(&mut self, name: &str, config: Value) -> Result<(), PluginError> {
        let factory = self
            .factories
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::Factory {
                name: name.to_string(),
                reason: "no factory registered under this name".to_string(),
            })?;

        let params = PluginFactoryParams {
            project_name: self.project_name.clone(),
        };
        let descriptor = factory.create(&params)?;
        descriptor.validate()?;

        let merged = match self.plugins.get(name) {
            Some(previous) => merge_configs(previous.config.clone(), config),
            None => config,
        };
        if let Some(schema) = &descriptor.config_schema {
            validate_schema(&merged, schema, &format!("provider config '{}'", name)).map_err(
                |err| PluginError::Config {
                    name: name.to_string(),
                    reason: err.to_string(),
                },
            )?;
        }

        self.install_handlers(name, &descriptor);

        self.load_order.retain(|n| n != name);
        self.load_order.push(name.to_string());
        self.plugins.insert(
            name.to_string(),
            LoadedPlugin {
                descriptor,
                config: merged,
            },
        );
        tracing::info!(plugin = name, "plugin loaded");
        Ok(())
    }

    fn install_handlers(&mut self, name: &str, descriptor: &PluginDescriptor) {
        for (kind, handler) in &descriptor.actions {
            let entries = self.plugin_handlers.entry(*kind).or_default();
            entries.retain(|e| e.plugin != name);
            entries.push(HandlerEntry {
                plugin: name.to_string(),
                handler: handler.clone(),
            });
        }
        for (module_type, actions) in &descriptor.module_actions {
            for (kind, handler) in actions {
                let entries = self
                    .module_handlers
                    .entry((module_type.clone(), *kind))
                    .or_default();
                entries.retain(|e| e.plugin != name);
                entries.push(HandlerEntry {
                    plugin: name.to_string(),
                    handler: handler.clone(),
                });
            }
        }
    }

    /// Loaded plugin names in load order.
    pub fn loaded_plugins(&self) -> &[String] {
        &self.load_order
    }

    pub fn plugin(&self, name: &str) -> Option<&LoadedPlugin> {
        self.plugins.get(name)
    }

    /// Look up a plugin-level handler. Without a plugin name the
    /// last-registered handler wins.
    pub fn plugin_action_handler(
        &self,
        kind: PluginActionKind,
        plugin: Option<&str>,
    ) -> Option<(String, Arc<dyn ActionHandler>)> {
        let entries = self.plugin_handlers.get(&kind)?;
        let entry = match plugin {
            Some(name) => entries.iter().find(|e| e.plugin == name)?,
            None => entries.last()?,
        };
        Some((entry.plugin.clone(), entry.handler.clone()))
    }

    /// Look up a module-level handler for a module type.
    pub fn module_action_handler(
        &self,
        kind: ModuleActionKind,
        module_type: &str,
        plugin: Option<&str>,
    ) -> Option<(String, Arc<dyn ActionHandler>)> {
        let entries = self
            .module_handlers
            .get(&(module_type.to_string(), kind))?;
        let entry = match plugin {
            Some(name) => entries.iter().find(|e| e.plugin == name)?,
            None => entries.last()?,
        };
        Some((entry.plugin.clone(), entry.handler.clone()))
    }

    /// Provider-independent fallback for a module action, if any.
    pub fn default_module_handler(
        &self,
        kind: ModuleActionKind,
    ) -> Option<Arc<dyn ActionHandler>> {
        self.default_module_handlers.get(&kind).cloned()
    }
}

/// Merge two provider configs: maps merge recursively, scalars and arrays
/// take the later value.
pub fn merge_configs(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => merge_configs(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}
