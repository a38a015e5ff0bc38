//! Template resolution errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("could not find key '{path}'")]
    KeyNotFound { path: String },
    #[error("circular template reference: {}", cycle.join(" -> "))]
    CircularReference { cycle: Vec<String> },
    #[error("template path '{path}' resolves to a non-primitive value")]
    NonPrimitive { path: String },
    #[error("invalid template string '{input}': {reason}")]
    Parse { input: String, reason: String },
    #[error("failed to compute outputs for '{path}': {reason}")]
    Outputs { path: String, reason: String },
}
