//! Watch hook.
//!
//! Detects configuration and module-source changes and hands the affected
//! module set (expanded with transitive dependants) to the caller, who
//! decides what to re-drive. The filesystem mechanics stay here; the
//! scheduling policy stays with the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use trellis_config::CONFIG_FILENAME;
use trellis_core::graph::ConfigGraph;
use trellis_core::vcs::VersionResolver;

/// A classified filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A config document changed; the project should be rescanned.
    ConfigChanged { path: PathBuf },
    /// Module sources changed. Contains the touched modules plus every
    /// transitive dependant.
    ModulesChanged { modules: Vec<String> },
}

/// Watches a project tree and emits classified change events.
pub struct ProjectWatcher {
    _watcher: RecommendedWatcher,
    cancel: CancellationToken,
}

impl ProjectWatcher {
    /// Start watching `project_root`. Version cache entries for touched
    /// paths are invalidated before the event is emitted.
    pub fn start(
        project_root: &Path,
        graph: Arc<ConfigGraph>,
        resolver: Option<Arc<VersionResolver>>,
        tx: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<Self, notify::Error> {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "watch error");
                        return;
                    }
                };
                if token.is_cancelled() {
                    return;
                }
                if !matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                for change in classify(&event.paths, &graph, resolver.as_deref()) {
                    if tx.send(change).is_err() {
                        return;
                    }
                }
            })?;

        watcher.watch(project_root, RecursiveMode::Recursive)?;
        tracing::info!(root = %project_root.display(), "watching project");
        Ok(Self {
            _watcher: watcher,
            cancel,
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop delivering events; dropping the watcher releases the OS watch.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

fn classify(
    paths: &[PathBuf],
    graph: &ConfigGraph,
    resolver: Option<&VersionResolver>,
) -> Vec<ChangeEvent> {
    let mut out = Vec::new();
    let mut touched_modules: Vec<&str> = Vec::new();

    for path in paths {
        if let Some(resolver) = resolver {
            resolver.cache().invalidate(path);
        }
        if path.file_name().map(|n| n == CONFIG_FILENAME).unwrap_or(false) {
            out.push(ChangeEvent::ConfigChanged { path: path.clone() });
            continue;
        }
        // Longest module-path prefix wins; nested module roots shadow
        // their parents.
        let mut best: Option<(&str, usize)> = None;
        for module in graph.modules().iter() {
            if path.starts_with(&module.path) {
                let depth = module.path.components().count();
                if best.map(|(_, d)| depth > d).unwrap_or(true) {
                    best = Some((&module.name, depth));
                }
            }
        }
        if let Some((name, _)) = best {
            if !touched_modules.contains(&name) {
                touched_modules.push(name);
            }
        }
    }

    if !touched_modules.is_empty() {
        match graph.with_dependant_modules(&touched_modules) {
            Ok(expanded) => out.push(ChangeEvent::ModulesChanged {
                modules: expanded.iter().map(|m| m.name.clone()).collect(),
            }),
            Err(e) => tracing::warn!(error = %e, "failed to expand changed modules"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use trellis_core::types::{BuildDependency, Module, ModuleSet};

    fn sample_graph() -> Arc<ConfigGraph> {
        let lib = Module::new("lib", "container", PathBuf::from("/p/lib"));
        let mut api = Module::new("api", "container", PathBuf::from("/p/api"));
        api.build.dependencies.push(BuildDependency {
            name: "lib".to_string(),
            copy: Vec::new(),
        });
        Arc::new(ConfigGraph::new(ModuleSet::new(vec![lib, api]).expect("set")).expect("graph"))
    }

    #[test]
    fn test_classify_config_changes() {
        let graph = sample_graph();
        let changes = classify(
            &[PathBuf::from("/p/api").join(CONFIG_FILENAME)],
            &graph,
            None,
        );
        assert!(matches!(changes[0], ChangeEvent::ConfigChanged { .. }));
    }

    #[test]
    fn test_classify_module_source_changes_expand_dependants() {
        let graph = sample_graph();
        let changes = classify(&[PathBuf::from("/p/lib/src/main.rs")], &graph, None);
        match &changes[0] {
            ChangeEvent::ModulesChanged { modules } => {
                assert!(modules.contains(&"lib".to_string()));
                assert!(modules.contains(&"api".to_string()));
            }
            other => panic!("unexpected change: {:?}", other),
        }
    }

    #[test]
    fn test_unrelated_paths_are_ignored() {
        let graph = sample_graph();
        assert!(classify(&[PathBuf::from("/elsewhere/file")], &graph, None).is_empty());
    }
}
