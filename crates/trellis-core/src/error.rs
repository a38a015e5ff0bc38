//! Error types shared across the core.

use thiserror::Error;

/// Violations detected while building or querying the config graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate {kind} name '{name}' declared by modules {modules:?}")]
    NameCollision {
        kind: &'static str,
        name: String,
        modules: Vec<String>,
    },
    #[error("{referer} depends on unknown {kind} '{name}'")]
    UnknownDependency {
        referer: String,
        kind: &'static str,
        name: String,
    },
    #[error("circular dependency detected: {}", cycle.join(" <- "))]
    CircularDependency { cycle: Vec<String> },
    #[error("unknown {kind} node '{name}'")]
    UnknownNode { kind: &'static str, name: String },
    #[error("unknown module '{0}'")]
    UnknownModule(String),
}

/// Unmet host prerequisites and VCS collaborator failures.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("required tool '{tool}' is not available: {reason}")]
    MissingTool { tool: String, reason: String },
    #[error("source checkout failed for '{name}': {reason}")]
    Checkout { name: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}
