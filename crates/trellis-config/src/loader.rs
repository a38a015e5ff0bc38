//! Configuration scanning and parsing.
//!
//! The loader walks a project tree, parses every `trellis.yml` it finds and
//! produces exactly one project record plus any number of module records.
//! Remote sources declared on the project or a module are checked out via
//! the VCS collaborator unless a local link override preempts them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

use trellis_core::error::HostError;
use trellis_core::vcs::{RemoteSourceRequest, SourceKind, VcsHandler};

use crate::declarations::{ConfigDeclaration, ModuleDeclaration, ProjectConfig};
use crate::ignore::IgnorePatterns;
use crate::local_store::LocalConfig;

/// Conventional config filename.
pub const CONFIG_FILENAME: &str = "trellis.yml";
/// Conventional ignore filename, read from the project root only.
pub const IGNORE_FILENAME: &str = ".trellisignore";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unknown declaration kind '{kind}' in {}", path.display())]
    UnknownKind { path: PathBuf, kind: String },
    #[error("document in {} declares neither 'kind' nor 'project'/'module'", path.display())]
    MissingKind { path: PathBuf },
    #[error("multiple project declarations: {} and {}", first.display(), second.display())]
    MultipleProjects { first: PathBuf, second: PathBuf },
    #[error("module '{name}' declared in both {} and {}", first.display(), second.display())]
    DuplicateModule {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("no project declaration found under {}", .0.display())]
    ProjectNotFound(PathBuf),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result of a full project scan.
#[derive(Debug, Clone)]
pub struct ConfigScan {
    pub project: ProjectConfig,
    pub project_root: PathBuf,
    pub modules: Vec<ModuleDeclaration>,
}

/// Parse every declaration out of one config document (possibly
/// multi-document YAML). Both the flat `kind:` style and the nested
/// `project:` / `module:` style are accepted.
pub fn parse_config_document(
    path: &Path,
    text: &str,
) -> Result<Vec<ConfigDeclaration>, ConfigError> {
    use serde::Deserialize;

    let mut declarations = Vec::new();

    for document in serde_yaml::Deserializer::from_str(text) {
        let value =
            serde_yaml::Value::deserialize(document).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if value.is_null() {
            continue;
        }
        let serde_yaml::Value::Mapping(mut mapping) = value else {
            return Err(ConfigError::MissingKind {
                path: path.to_path_buf(),
            });
        };

        let kind_key = serde_yaml::Value::from("kind");
        if let Some(kind) = mapping.remove(&kind_key) {
            let kind = kind.as_str().unwrap_or_default().to_string();
            let body = serde_yaml::Value::Mapping(mapping);
            match kind.as_str() {
                "Project" => declarations
                    .push(ConfigDeclaration::Project(from_yaml(path, body)?)),
                "Module" => declarations
                    .push(ConfigDeclaration::Module(from_yaml(path, body)?)),
                _ => {
                    return Err(ConfigError::UnknownKind {
                        path: path.to_path_buf(),
                        kind,
                    })
                }
            }
            continue;
        }

        let mut matched = false;
        if let Some(body) = mapping.remove(&serde_yaml::Value::from("project")) {
            declarations.push(ConfigDeclaration::Project(from_yaml(path, body)?));
            matched = true;
        }
        if let Some(body) = mapping.remove(&serde_yaml::Value::from("module")) {
            declarations.push(ConfigDeclaration::Module(from_yaml(path, body)?));
            matched = true;
        }
        if !matched {
            return Err(ConfigError::MissingKind {
                path: path.to_path_buf(),
            });
        }
    }

    Ok(declarations)
}

fn from_yaml<T: DeserializeOwned>(path: &Path, value: serde_yaml::Value) -> Result<T, ConfigError> {
    serde_yaml::from_value(value).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Scans project trees for configuration.
pub struct ProjectLoader {
    vcs: Arc<dyn VcsHandler>,
    linked_project_sources: BTreeMap<String, PathBuf>,
    linked_module_sources: BTreeMap<String, PathBuf>,
}

impl ProjectLoader {
    pub fn new(vcs: Arc<dyn VcsHandler>) -> Self {
        Self {
            vcs,
            linked_project_sources: BTreeMap::new(),
            linked_module_sources: BTreeMap::new(),
        }
    }

    /// Apply link overrides from the local config store.
    pub fn with_local_config(mut self, local: &LocalConfig) -> Self {
        for link in &local.linked_project_sources {
            self.linked_project_sources
                .insert(link.name.clone(), link.path.clone());
        }
        for link in &local.linked_module_sources {
            self.linked_module_sources
                .insert(link.name.clone(), link.path.clone());
        }
        self
    }

    /// Scan `root` and every declared project source, returning the project
    /// record and all module declarations with absolute paths.
    pub async fn load(&self, root: &Path) -> Result<ConfigScan, ConfigError> {
        let root = root.canonicalize()?;
        let ignore = self.load_ignore_patterns(&root)?;

        let mut project: Option<(ProjectConfig, PathBuf)> = None;
        let mut modules: Vec<ModuleDeclaration> = Vec::new();
        let mut module_paths: BTreeMap<String, PathBuf> = BTreeMap::new();

        self.scan_tree(&root, &root, &ignore, &mut project, &mut modules, &mut module_paths)?;

        if project.is_none() {
            return Err(ConfigError::ProjectNotFound(root.clone()));
        }

        // Extra project sources: linked path wins over a fresh checkout. A
        // second Project declaration inside a source is still an error.
        let sources = project
            .as_ref()
            .map(|(p, _)| p.sources.clone())
            .unwrap_or_default();
        for source in &sources {
            let path = match self.linked_project_sources.get(&source.name) {
                Some(linked) => {
                    tracing::debug!(source = %source.name, path = %linked.display(), "using linked project source");
                    linked.clone()
                }
                None => {
                    self.vcs
                        .ensure_remote_source(&RemoteSourceRequest {
                            name: source.name.clone(),
                            repository_url: source.repository_url.clone(),
                            kind: SourceKind::Project,
                        })
                        .await?
                }
            };
            self.scan_tree(&path, &path, &ignore, &mut project, &mut modules, &mut module_paths)?;
        }

        let (project, project_root) = project.expect("checked above");

        // Modules with their own repository live in a checkout of it.
        for module in &mut modules {
            let Some(url) = module.repository_url.clone() else {
                continue;
            };
            module.path = match self.linked_module_sources.get(&module.name) {
                Some(linked) => linked.clone(),
                None => {
                    self.vcs
                        .ensure_remote_source(&RemoteSourceRequest {
                            name: module.name.clone(),
                            repository_url: url,
                            kind: SourceKind::Module,
                        })
                        .await?
                }
            };
        }

        tracing::info!(
            project = %project.name,
            modules = modules.len(),
            "project scan complete"
        );
        Ok(ConfigScan {
            project,
            project_root,
            modules,
        })
    }

    fn load_ignore_patterns(&self, root: &Path) -> Result<IgnorePatterns, ConfigError> {
        let path = root.join(IGNORE_FILENAME);
        if path.is_file() {
            Ok(IgnorePatterns::parse(&fs::read_to_string(path)?))
        } else {
            Ok(IgnorePatterns::default())
        }
    }

    fn scan_tree(
        &self,
        root: &Path,
        dir: &Path,
        ignore: &IgnorePatterns,
        project: &mut Option<(ProjectConfig, PathBuf)>,
        modules: &mut Vec<ModuleDeclaration>,
        module_paths: &mut BTreeMap<String, PathBuf>,
    ) -> Result<(), ConfigError> {
        let config_path = dir.join(CONFIG_FILENAME);
        if config_path.is_file() {
            let text = fs::read_to_string(&config_path)?;
            for declaration in parse_config_document(&config_path, &text)? {
                match declaration {
                    ConfigDeclaration::Project(config) => {
                        if let Some((_, first)) = project {
                            return Err(ConfigError::MultipleProjects {
                                first: first.clone(),
                                second: dir.to_path_buf(),
                            });
                        }
                        *project = Some((config, dir.to_path_buf()));
                    }
                    ConfigDeclaration::Module(mut module) => {
                        if let Some(first) = module_paths.get(&module.name) {
                            return Err(ConfigError::DuplicateModule {
                                name: module.name,
                                first: first.clone(),
                                second: dir.to_path_buf(),
                            });
                        }
                        module.path = dir.to_path_buf();
                        module_paths.insert(module.name.clone(), dir.to_path_buf());
                        modules.push(module);
                    }
                }
            }
        }

        let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if name == ".git" {
                continue;
            }
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if ignore.is_ignored(relative, true) {
                continue;
            }
            self.scan_tree(root, &path, ignore, project, modules, module_paths)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use trellis_core::types::TreeVersion;

    struct FakeVcs {
        checkouts: Mutex<Vec<String>>,
        checkout_dir: PathBuf,
    }

    impl FakeVcs {
        fn new(checkout_dir: PathBuf) -> Self {
            Self {
                checkouts: Mutex::new(Vec::new()),
                checkout_dir,
            }
        }
    }

    #[async_trait]
    impl VcsHandler for FakeVcs {
        async fn resolve_tree_version(&self, _path: &Path) -> Result<TreeVersion, HostError> {
            Ok(TreeVersion::clean("fake"))
        }

        async fn ensure_remote_source(
            &self,
            request: &RemoteSourceRequest,
        ) -> Result<PathBuf, HostError> {
            self.checkouts
                .lock()
                .expect("lock")
                .push(request.name.clone());
            Ok(self.checkout_dir.clone())
        }
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write");
    }

    fn loader(checkout_dir: PathBuf) -> ProjectLoader {
        ProjectLoader::new(Arc::new(FakeVcs::new(checkout_dir)))
    }

    #[tokio::test]
    async fn test_flat_and_nested_styles_yield_identical_records() {
        let flat = parse_config_document(
            Path::new("flat.yml"),
            "kind: Module\ntype: exec\nname: tool\n",
        )
        .expect("flat");
        let nested = parse_config_document(
            Path::new("nested.yml"),
            "module:\n  type: exec\n  name: tool\n",
        )
        .expect("nested");
        assert_eq!(flat, nested);
    }

    #[tokio::test]
    async fn test_multi_document_files_parse_every_record() {
        let decls = parse_config_document(
            Path::new("multi.yml"),
            "kind: Project\nname: demo\n---\nkind: Module\ntype: exec\nname: tool\n",
        )
        .expect("parse");
        assert_eq!(decls.len(), 2);
        assert!(matches!(decls[0], ConfigDeclaration::Project(_)));
        assert!(matches!(decls[1], ConfigDeclaration::Module(_)));
    }

    #[tokio::test]
    async fn test_unknown_kind_is_rejected() {
        let result =
            parse_config_document(Path::new("bad.yml"), "kind: Widget\nname: nope\n");
        assert!(matches!(result, Err(ConfigError::UnknownKind { kind, .. }) if kind == "Widget"));
    }

    #[tokio::test]
    async fn test_scan_finds_project_and_modules() {
        let tmp = TempDir::new().expect("tmp");
        write(tmp.path(), "trellis.yml", "kind: Project\nname: demo\n");
        write(
            tmp.path(),
            "api/trellis.yml",
            "kind: Module\ntype: container\nname: api\n",
        );
        write(
            tmp.path(),
            "tools/cli/trellis.yml",
            "module:\n  type: exec\n  name: cli\n",
        );

        let scan = loader(tmp.path().to_path_buf())
            .load(tmp.path())
            .await
            .expect("scan");

        assert_eq!(scan.project.name, "demo");
        let mut names: Vec<&str> = scan.modules.iter().map(|m| m.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["api", "cli"]);
        assert!(scan.modules.iter().all(|m| m.path.is_absolute()));
    }

    #[tokio::test]
    async fn test_scan_honours_ignore_patterns() {
        let tmp = TempDir::new().expect("tmp");
        write(tmp.path(), "trellis.yml", "kind: Project\nname: demo\n");
        write(tmp.path(), ".trellisignore", "vendor\n");
        write(
            tmp.path(),
            "vendor/dep/trellis.yml",
            "kind: Module\ntype: exec\nname: vendored\n",
        );

        let scan = loader(tmp.path().to_path_buf())
            .load(tmp.path())
            .await
            .expect("scan");
        assert!(scan.modules.is_empty());
    }

    #[tokio::test]
    async fn test_scan_rejects_duplicate_module_names() {
        let tmp = TempDir::new().expect("tmp");
        write(tmp.path(), "trellis.yml", "kind: Project\nname: demo\n");
        write(
            tmp.path(),
            "a/trellis.yml",
            "kind: Module\ntype: exec\nname: dup\n",
        );
        write(
            tmp.path(),
            "b/trellis.yml",
            "kind: Module\ntype: exec\nname: dup\n",
        );

        let result = loader(tmp.path().to_path_buf()).load(tmp.path()).await;
        assert!(matches!(
            result,
            Err(ConfigError::DuplicateModule { name, .. }) if name == "dup"
        ));
    }

    #[tokio::test]
    async fn test_scan_rejects_multiple_projects() {
        let tmp = TempDir::new().expect("tmp");
        write(tmp.path(), "trellis.yml", "kind: Project\nname: one\n");
        write(tmp.path(), "sub/trellis.yml", "kind: Project\nname: two\n");

        let result = loader(tmp.path().to_path_buf()).load(tmp.path()).await;
        assert!(matches!(result, Err(ConfigError::MultipleProjects { .. })));
    }

    #[tokio::test]
    async fn test_remote_project_source_is_checked_out_and_scanned() {
        let remote = TempDir::new().expect("remote");
        write(
            remote.path(),
            "lib/trellis.yml",
            "kind: Module\ntype: exec\nname: remote-lib\n",
        );

        let tmp = TempDir::new().expect("tmp");
        write(
            tmp.path(),
            "trellis.yml",
            "kind: Project\nname: demo\nsources:\n  - name: extras\n    repositoryUrl: https://example.com/extras.git\n",
        );

        let vcs = Arc::new(FakeVcs::new(remote.path().to_path_buf()));
        let scan = ProjectLoader::new(vcs.clone())
            .load(tmp.path())
            .await
            .expect("scan");

        assert_eq!(vcs.checkouts.lock().expect("lock").as_slice(), ["extras"]);
        assert_eq!(scan.modules.len(), 1);
        assert_eq!(scan.modules[0].name, "remote-lib");
    }

    #[tokio::test]
    async fn test_linked_source_preempts_checkout() {
        let linked = TempDir::new().expect("linked");
        write(
            linked.path(),
            "trellis.yml",
            "kind: Module\ntype: exec\nname: linked-lib\n",
        );

        let tmp = TempDir::new().expect("tmp");
        write(
            tmp.path(),
            "trellis.yml",
            "kind: Project\nname: demo\nsources:\n  - name: extras\n    repositoryUrl: https://example.com/extras.git\n",
        );

        let vcs = Arc::new(FakeVcs::new(PathBuf::from("/nonexistent")));
        let local = LocalConfig {
            linked_project_sources: vec![crate::local_store::LinkedSource {
                name: "extras".to_string(),
                path: linked.path().to_path_buf(),
            }],
            ..LocalConfig::default()
        };
        let scan = ProjectLoader::new(vcs.clone())
            .with_local_config(&local)
            .load(tmp.path())
            .await
            .expect("scan");

        assert!(vcs.checkouts.lock().expect("lock").is_empty());
        assert_eq!(scan.modules[0].name, "linked-lib");
    }
}
