//! # Trellis Config
//!
//! On-disk configuration for Trellis projects. Each directory may carry a
//! `trellis.yml` document declaring a project and/or modules, in either the
//! flat (`kind:` discriminator) or nested (`project:` / `module:` keys)
//! style. Both styles yield identical records.

mod declarations;
mod ignore;
mod loader;
mod local_store;

pub use declarations::{
    ConfigDeclaration, EnvironmentConfig, EnvironmentDefaults, ModuleDeclaration, ProjectConfig,
    ProviderDeclaration, ServiceDeclaration, SourceConfig, TaskDeclaration, TestDeclaration,
};
pub use ignore::IgnorePatterns;
pub use loader::{
    parse_config_document, ConfigError, ConfigScan, ProjectLoader, CONFIG_FILENAME,
    IGNORE_FILENAME,
};
pub use local_store::{
    LinkedSource, LocalConfig, LocalConfigStore, LOCAL_CONFIG_FILENAME, MAX_PREVIOUS_USERNAMES,
};
