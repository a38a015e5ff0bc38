//! Version resolution against the VCS collaborator.
//!
//! The VCS itself is out of scope; this module consumes its two contracts:
//! tree digests for a module path and checkouts for remote sources. Resolved
//! module versions are memoised in a cache that is invalidated by path
//! prefix whenever a watched tree changes.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::{GraphError, HostError};
use crate::types::{Module, ModuleSet, ModuleVersion, TreeVersion};

/// What kind of declaration requested a remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Project,
    Module,
}

/// A request for a local checkout of a remote source.
#[derive(Debug, Clone)]
pub struct RemoteSourceRequest {
    pub name: String,
    pub repository_url: String,
    pub kind: SourceKind,
}

/// Contracts consumed from the version-control collaborator.
#[async_trait]
pub trait VcsHandler: Send + Sync {
    /// Stable digest of the tracked file contents under `path`.
    async fn resolve_tree_version(&self, path: &Path) -> Result<TreeVersion, HostError>;

    /// Ensure a local checkout for a remote source and return its path.
    async fn ensure_remote_source(
        &self,
        request: &RemoteSourceRequest,
    ) -> Result<PathBuf, HostError>;
}

#[derive(Debug, Error)]
pub enum VersionError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

struct CacheEntry {
    version: ModuleVersion,
    /// Path prefixes whose modification invalidates this entry.
    contexts: Vec<PathBuf>,
}

/// Process-scope memo cache for resolved module versions.
#[derive(Default)]
pub struct VersionCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Option<ModuleVersion> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|e| e.version.clone())
    }

    fn put(&self, key: String, version: ModuleVersion, contexts: Vec<PathBuf>) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, CacheEntry { version, contexts });
    }

    /// Drop every entry whose invalidation context overlaps `path`.
    pub fn invalidate(&self, path: &Path) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| {
            !entry
                .contexts
                .iter()
                .any(|ctx| path.starts_with(ctx) || ctx.starts_with(path))
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves module versions by combining tree digests with dependency
/// versions.
pub struct VersionResolver {
    vcs: Arc<dyn VcsHandler>,
    cache: VersionCache,
}

impl VersionResolver {
    pub fn new(vcs: Arc<dyn VcsHandler>) -> Self {
        Self {
            vcs,
            cache: VersionCache::new(),
        }
    }

    pub fn cache(&self) -> &VersionCache {
        &self.cache
    }

    /// Resolve the version of `module`, recursing through its build
    /// dependencies.
    pub async fn resolve_version(
        &self,
        module: &Module,
        modules: &ModuleSet,
    ) -> Result<ModuleVersion, VersionError> {
        self.resolve_inner(module, modules).await
    }

    fn resolve_inner<'a>(
        &'a self,
        module: &'a Module,
        modules: &'a ModuleSet,
    ) -> Pin<Box<dyn Future<Output = Result<ModuleVersion, VersionError>> + Send + 'a>> {
        Box::pin(async move {
            let mut dep_names: Vec<&str> = module.build_dependency_names();
            dep_names.sort_unstable();

            let cache_key = format!("{}.{}", module.name, dep_names.join("."));
            if let Some(version) = self.cache.get(&cache_key) {
                return Ok(version);
            }

            let tree = self.vcs.resolve_tree_version(&module.path).await?;

            let mut contexts = vec![module.path.clone()];
            let mut dependency_versions = BTreeMap::new();
            let mut dirty_timestamp = tree.dirty_timestamp;

            for name in &dep_names {
                let dep = modules.require(name)?;
                let dep_version = self.resolve_inner(dep, modules).await?;
                dirty_timestamp = match (dirty_timestamp, dep_version.dirty_timestamp) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                contexts.push(dep.path.clone());
                dependency_versions.insert(name.to_string(), dep_version.version_string);
            }

            let version = ModuleVersion {
                version_string: digest_version(&tree, &dependency_versions),
                dirty_timestamp,
                dependency_versions,
            };

            tracing::debug!(
                module = %module.name,
                version = %version.version_string,
                "resolved module version"
            );
            self.cache.put(cache_key, version.clone(), contexts);
            Ok(version)
        })
    }
}

/// Combine a tree digest with sorted dependency versions into a version
/// string of the form `v-<hex10>`.
pub fn digest_version(tree: &TreeVersion, dependencies: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tree.content_hash.as_bytes());
    for (name, version) in dependencies {
        hasher.update(name.as_bytes());
        hasher.update(version.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("v-{}", &digest[..10])
}
