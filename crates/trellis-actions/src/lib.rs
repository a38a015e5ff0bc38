//! # Trellis Actions
//!
//! Loads and configures provider plugins, maintains the action-handler
//! dispatch tables, and routes typed action invocations to the right
//! handler with schema-validated inputs and outputs.

mod defaults;
mod dispatcher;
mod registry;

pub use defaults::install_default_handlers;
pub use dispatcher::{ActionDispatcher, DispatchError, DispatchOptions};
pub use registry::{LoadedPlugin, ProviderRegistry};
