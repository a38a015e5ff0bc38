//! # Trellis Context
//!
//! The hierarchical variable namespace presented to the template engine,
//! and the engine itself. Template strings contain `${dotted.path}`
//! expressions evaluated lazily over a tree of context nodes; resolution
//! carries an explicit stack of paths for cycle detection.

mod error;
mod layers;
mod node;
mod references;
mod template;

pub use error::TemplateError;
pub use layers::{ModuleContext, ModuleContextEntry, ProjectContext, ProviderContext};
pub use node::{ContextNode, LazyValue, StaticOutputs};
pub use references::{collect_template_references, module_template_references};
pub use template::{parse_template, Segment, TemplateEngine};
