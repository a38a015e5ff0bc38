//! # Trellis Core
//!
//! Core abstractions and deterministic logic for the Trellis execution core.
//!
//! This crate contains:
//! - Module / Service / Task / Test / Provider definitions
//! - The immutable, acyclic ConfigGraph and its query API
//! - Module version resolution against a pluggable VCS handler
//!
//! This crate does NOT care about:
//! - How configuration is parsed from disk
//! - Which plugin handles an action
//! - How tasks are scheduled

pub mod error;
pub mod graph;
pub mod types;
pub mod vcs;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{GraphError, HostError};
    pub use crate::graph::{ConfigGraph, GraphNode, NodeKind, NodeRef};
    pub use crate::types::{
        BuildConfig, BuildDependency, CopySpec, Module, ModuleSet, ModuleVersion, Provider,
        ProviderStatus, ServiceConfig, TaskConfig, TestConfig, TreeVersion,
    };
    pub use crate::vcs::{
        RemoteSourceRequest, SourceKind, VcsHandler, VersionCache, VersionError, VersionResolver,
    };
}

pub use error::{GraphError, HostError};
pub use graph::{ConfigGraph, GraphNode, NodeKind, NodeRef};
pub use types::{
    BuildConfig, BuildDependency, CopySpec, Module, ModuleSet, ModuleVersion, Provider,
    ProviderStatus, ServiceConfig, TaskConfig, TestConfig, TreeVersion,
};
pub use vcs::{
    RemoteSourceRequest, SourceKind, VcsHandler, VersionCache, VersionError, VersionResolver,
};
