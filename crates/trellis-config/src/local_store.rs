//! Per-project local configuration.
//!
//! Holds user identity for namespacing and local link overrides for remote
//! sources. The document is strictly validated; unknown keys are rejected.
//! Writers within a process are serialised through an async mutex and the
//! file is replaced atomically.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::loader::ConfigError;

/// Conventional filename inside the project-local dot directory.
pub const LOCAL_CONFIG_FILENAME: &str = "local-config.yml";
/// How many previous usernames are retained.
pub const MAX_PREVIOUS_USERNAMES: usize = 5;

/// A local path standing in for a remote source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkedSource {
    pub name: String,
    pub path: PathBuf,
}

/// The local config document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct LocalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_usernames: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_project_sources: Vec<LinkedSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_module_sources: Vec<LinkedSource>,
}

impl LocalConfig {
    /// Change the current username, retiring the old one into the bounded
    /// history.
    pub fn set_username(&mut self, username: impl Into<String>) {
        let username = username.into();
        if let Some(old) = self.username.take() {
            if old != username {
                self.previous_usernames.retain(|u| *u != old);
                self.previous_usernames.push(old);
                if self.previous_usernames.len() > MAX_PREVIOUS_USERNAMES {
                    let drop = self.previous_usernames.len() - MAX_PREVIOUS_USERNAMES;
                    self.previous_usernames.drain(..drop);
                }
            }
        }
        self.username = Some(username);
    }

    pub fn linked_project_source(&self, name: &str) -> Option<&Path> {
        self.linked_project_sources
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.path.as_path())
    }

    pub fn linked_module_source(&self, name: &str) -> Option<&Path> {
        self.linked_module_sources
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.path.as_path())
    }
}

/// Serialised read-modify-write store for [`LocalConfig`].
pub struct LocalConfigStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LocalConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document; a missing file yields the default config.
    pub async fn load(&self) -> Result<LocalConfig, ConfigError> {
        let _guard = self.lock.lock().await;
        self.read()
    }

    /// Apply `mutate` to the current document and persist the result.
    pub async fn update<F>(&self, mutate: F) -> Result<LocalConfig, ConfigError>
    where
        F: FnOnce(&mut LocalConfig),
    {
        let _guard = self.lock.lock().await;
        let mut config = self.read()?;
        mutate(&mut config);
        self.write(&config)?;
        Ok(config)
    }

    fn read(&self) -> Result<LocalConfig, ConfigError> {
        if !self.path.is_file() {
            return Ok(LocalConfig::default());
        }
        let text = fs::read_to_string(&self.path)?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, config: &LocalConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(config)
            .map_err(|e| ConfigError::Invalid(format!("serialize local config: {}", e)))?;
        let tmp = self.path.with_extension("yml.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
