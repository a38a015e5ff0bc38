//! Module version identity.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Digest of a single module tree as reported by the VCS collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeVersion {
    /// Stable content digest of the tracked files under the module path.
    pub content_hash: String,
    /// Most recent uncommitted-change timestamp, if the tree is dirty.
    #[serde(default)]
    pub dirty_timestamp: Option<DateTime<Utc>>,
}

impl TreeVersion {
    pub fn clean(content_hash: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            dirty_timestamp: None,
        }
    }
}

/// The resolved version of a module, combining its own tree digest with the
/// versions of its build dependencies.
///
/// Two modules with identical sources and identical dependency versions
/// produce identical `version_string`s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub version_string: String,
    #[serde(default)]
    pub dirty_timestamp: Option<DateTime<Utc>>,
    /// Dependency name -> that dependency's `version_string`, sorted by name.
    #[serde(default)]
    pub dependency_versions: BTreeMap<String, String>,
}

impl ModuleVersion {
    /// A fixed version for tasks that have no meaningful source identity.
    pub fn null() -> Self {
        Self {
            version_string: "v-0000000000".to_string(),
            dirty_timestamp: None,
            dependency_versions: BTreeMap::new(),
        }
    }
}
