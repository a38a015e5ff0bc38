//! The task contract consumed by the scheduler.
//!
//! A task's identity has two levels: `base_key` (`type.name`)
//! de-duplicates across parameter variants, `key` (`base_key.paramsHash8`)
//! distinguishes them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use trellis_actions::DispatchError;
use trellis_core::types::ModuleVersion;
use trellis_core::VersionError;

/// Default per-type concurrency ceiling.
pub const DEFAULT_TASK_CONCURRENCY: usize = 10;

/// Errors raised by task bodies.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),
    #[error("task '{key}' timed out after {seconds}s")]
    Timeout { key: String, seconds: u64 },
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error("failed to compute dependencies: {0}")]
    Dependencies(String),
}

/// Result record for one scheduled task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_type: String,
    pub base_key: String,
    pub key: String,
    /// Unique per add; distinguishes re-runs of the same key.
    pub id: String,
    pub description: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Results of direct dependencies, keyed by their base key.
    pub dependency_results: BTreeMap<String, TaskResult>,
}

/// Task results keyed by task key.
pub type TaskResults = BTreeMap<String, TaskResult>;

/// A unit of work processed by the task graph.
#[async_trait]
pub trait GraphTask: Send + Sync {
    /// Type tag, also the unit of per-type concurrency throttling.
    fn task_type(&self) -> &str;

    fn name(&self) -> String;

    fn description(&self) -> String {
        format!("{}.{}", self.task_type(), self.name())
    }

    fn version(&self) -> ModuleVersion {
        ModuleVersion::null()
    }

    /// Bypass the result cache for this task.
    fn force(&self) -> bool {
        false
    }

    fn concurrency_limit(&self) -> usize {
        DEFAULT_TASK_CONCURRENCY
    }

    /// Params discriminator appended to the base key, when params matter.
    fn params_hash(&self) -> Option<String> {
        None
    }

    fn base_key(&self) -> String {
        format!("{}.{}", self.task_type(), self.name())
    }

    fn key(&self) -> String {
        match self.params_hash() {
            Some(digest) => format!("{}.{}", self.base_key(), digest),
            None => self.base_key(),
        }
    }

    /// Direct dependencies. Must be deterministic for a given key.
    async fn dependencies(&self) -> Result<Vec<Arc<dyn GraphTask>>, TaskError>;

    /// Execute the task. `dependency_results` is keyed by dependency base
    /// key and contains one completed result per dependency.
    async fn process(&self, dependency_results: &TaskResults) -> Result<Value, TaskError>;
}

/// 8-hex-char digest of a params value, for [`GraphTask::params_hash`].
pub fn hash_params(value: &Value) -> String {
    let digest = format!("{:x}", Sha256::digest(value.to_string().as_bytes()));
    digest[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Probe;

    #[async_trait]
    impl GraphTask for Probe {
        fn task_type(&self) -> &str {
            "build"
        }

        fn name(&self) -> String {
            "api".to_string()
        }

        fn params_hash(&self) -> Option<String> {
            Some(hash_params(&json!({"force": true})))
        }

        async fn dependencies(&self) -> Result<Vec<Arc<dyn GraphTask>>, TaskError> {
            Ok(Vec::new())
        }

        async fn process(&self, _deps: &TaskResults) -> Result<Value, TaskError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_keys_compose_type_name_and_params() {
        let task = Probe;
        assert_eq!(task.base_key(), "build.api");
        let key = task.key();
        assert!(key.starts_with("build.api."));
        assert_eq!(key.len(), "build.api.".len() + 8);
    }

    #[test]
    fn test_hash_params_is_stable_and_short() {
        let a = hash_params(&json!({"x": 1}));
        let b = hash_params(&json!({"x": 1}));
        let c = hash_params(&json!({"x": 2}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);
    }
}
