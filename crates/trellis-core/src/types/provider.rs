//! Provider instance state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a configured plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Loaded,
    Configured,
    Prepared,
    CleanedUp,
}

/// A configured plugin instance.
///
/// Outputs become available once the provider's environment has been
/// prepared; modules reference providers by name only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    /// Names of providers that must be prepared before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Provider-specific configuration, validated against the plugin schema.
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    pub status: ProviderStatus,
}

impl Provider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            config: Value::Null,
            outputs: HashMap::new(),
            status: ProviderStatus::Loaded,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self.status = ProviderStatus::Configured;
        self
    }

    pub fn mark_prepared(&mut self, outputs: HashMap<String, Value>) {
        self.outputs = outputs;
        self.status = ProviderStatus::Prepared;
    }
}
