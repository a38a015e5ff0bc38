//! # Trellis Runtime
//!
//! The execution core: a concurrent, dependency-ordered, de-duplicating,
//! result-caching task graph, the event bus it emits on, the concrete task
//! kinds, module resolution and the watch hook.
//!
//! This crate does NOT care about:
//! - How results are rendered to a terminal or dashboard
//! - How the version-control collaborator computes digests
//! - What individual provider plugins do inside their handlers

pub mod cache;
pub mod events;
pub mod graph;
pub mod project;
pub mod task;
pub mod tasks;
pub mod watcher;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cache::{ResultCache, MAX_CACHE_SIZE};
    pub use crate::events::{TaskEventBus, TaskGraphEvent};
    pub use crate::graph::{TaskGraph, TaskGraphError, DEFAULT_CONCURRENCY};
    pub use crate::project::{configure_modules, resolve_modules};
    pub use crate::task::{
        hash_params, GraphTask, TaskError, TaskResult, TaskResults, DEFAULT_TASK_CONCURRENCY,
    };
    pub use crate::tasks::{
        BuildTask, DeployTask, HotReloadTask, PushTask, ResolveProviderTask, RunTaskTask,
        TaskFactory, TestTask,
    };
    pub use crate::watcher::{ChangeEvent, ProjectWatcher};
}

pub use cache::{ResultCache, MAX_CACHE_SIZE};
pub use events::{TaskEventBus, TaskGraphEvent};
pub use graph::{TaskGraph, TaskGraphError, DEFAULT_CONCURRENCY};
pub use project::{configure_modules, resolve_modules};
pub use task::{hash_params, GraphTask, TaskError, TaskResult, TaskResults};
pub use tasks::TaskFactory;
pub use watcher::{ChangeEvent, ProjectWatcher};
