//! The task graph scheduler.
//!
//! A concurrent, dependency-ordered, de-duplicating, result-caching
//! executor. Task bodies run in parallel as spawned futures; all graph
//! state lives behind a single mutex whose critical sections never await,
//! so the structural invariants are never observed mid-update.
//!
//! Identity and de-duplication:
//! - two tasks with the same `key` coalesce onto one node;
//! - two tasks with the same `base_key` but different keys never run
//!   concurrently; the newer one is enqueued behind the in-flight
//!   predecessor and inherits its dependants;
//! - a cached non-error result satisfies a non-forced add immediately,
//!   without invoking the task body.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::events::{TaskEventBus, TaskGraphEvent};
use crate::task::{GraphTask, TaskError, TaskResult, TaskResults};

/// Default ceiling on concurrently executing task bodies.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Scheduler-level failures.
#[derive(Debug, Error)]
pub enum TaskGraphError {
    #[error("{} task(s) failed", results.values().filter(|r| r.error.is_some()).count())]
    Failed { results: TaskResults },
    #[error("failed to compute task dependencies: {0}")]
    Dependencies(String),
    #[error("task graph internal error: {0}")]
    Internal(String),
}

struct TaskNode {
    id: Uuid,
    task: Arc<dyn GraphTask>,
    task_type: String,
    base_key: String,
    key: String,
    description: String,
    /// Keys of dependency nodes still in the graph.
    remaining_deps: BTreeSet<String>,
    /// Keys of nodes depending on this one.
    dependants: BTreeSet<String>,
    /// Completed dependency results, keyed by base key.
    dependency_results: TaskResults,
    /// Task types of the enqueuing parent chain; a task whose own type
    /// appears here is exempt from the per-type throttle.
    ancestor_types: BTreeSet<String>,
    waiters: Vec<oneshot::Sender<TaskResult>>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TaskNode {
    fn result(
        &self,
        output: Option<Value>,
        error: Option<String>,
        completed: bool,
    ) -> TaskResult {
        TaskResult {
            task_type: self.task_type.clone(),
            base_key: self.base_key.clone(),
            key: self.key.clone(),
            id: self.id.to_string(),
            description: self.description.clone(),
            started_at: self.started_at,
            completed_at: completed.then(Utc::now),
            output,
            error,
            dependency_results: self.dependency_results.clone(),
        }
    }
}

struct GraphState {
    index: HashMap<String, TaskNode>,
    in_progress: HashSet<String>,
    in_progress_types: HashMap<String, usize>,
    /// Memoised dependency base-key sets, recorded on first expansion.
    dependency_cache: HashMap<String, BTreeSet<String>>,
    result_cache: ResultCache,
    /// Results accumulated during the current processing window.
    results: TaskResults,
    graph_active: bool,
}

struct Expanded {
    task: Arc<dyn GraphTask>,
    dep_keys: Vec<String>,
}

/// The scheduler.
pub struct TaskGraph {
    state: Mutex<GraphState>,
    bus: TaskEventBus,
    concurrency: usize,
}

impl TaskGraph {
    pub fn new(bus: TaskEventBus) -> Self {
        Self::with_concurrency(bus, DEFAULT_CONCURRENCY)
    }

    pub fn with_concurrency(bus: TaskEventBus, concurrency: usize) -> Self {
        Self {
            state: Mutex::new(GraphState {
                index: HashMap::new(),
                in_progress: HashSet::new(),
                in_progress_types: HashMap::new(),
                dependency_cache: HashMap::new(),
                result_cache: ResultCache::new(),
                results: TaskResults::new(),
                graph_active: false,
            }),
            bus,
            concurrency: concurrency.max(1),
        }
    }

    pub fn events(&self) -> &TaskEventBus {
        &self.bus
    }

    /// Process a set of tasks and wait for their results. `parent` is the
    /// task whose body requested this batch, if any; it only affects the
    /// per-type concurrency exemption for same-type descendants.
    pub async fn process(
        self: &Arc<Self>,
        tasks: Vec<Arc<dyn GraphTask>>,
        parent: Option<&dyn GraphTask>,
    ) -> Result<TaskResults, TaskGraphError> {
        let closure = self.expand(&tasks).await?;

        let receivers = {
            let mut state = self.lock_state();

            // A fresh window starts with a clean result accumulator.
            if !state.graph_active && state.index.is_empty() {
                state.results.clear();
            }

            let ancestor_types = self.ancestor_types_for(&state, parent);
            for task in &tasks {
                self.insert_task(&mut state, &task.key(), &closure, &ancestor_types);
            }

            if !state.index.is_empty() && !state.graph_active {
                state.graph_active = true;
                self.bus.publish(TaskGraphEvent::TaskGraphProcessing {
                    started_at: Utc::now(),
                });
            }

            let mut receivers = Vec::with_capacity(tasks.len());
            for task in &tasks {
                let key = task.key();
                let (tx, rx) = oneshot::channel();
                if let Some(node) = state.index.get_mut(&key) {
                    node.waiters.push(tx);
                } else if let Some(result) = state.results.get(&key) {
                    let _ = tx.send(result.clone());
                } else {
                    return Err(TaskGraphError::Internal(format!(
                        "task '{}' was neither scheduled nor satisfied",
                        key
                    )));
                }
                receivers.push((key, rx));
            }

            self.pump(&mut state);
            receivers
        };

        let mut results = TaskResults::new();
        let mut failed = false;
        for (key, rx) in receivers {
            let result = rx.await.map_err(|_| {
                TaskGraphError::Internal(format!("result channel for '{}' dropped", key))
            })?;
            if result.error.is_some() {
                failed = true;
            }
            results.insert(key, result);
        }

        if failed {
            let mut accumulated = self.lock_state().results.clone();
            accumulated.extend(results);
            Err(TaskGraphError::Failed {
                results: accumulated,
            })
        } else {
            Ok(results)
        }
    }

    /// Like [`process`](Self::process), but unwraps outputs.
    pub async fn resolve(
        self: &Arc<Self>,
        tasks: Vec<Arc<dyn GraphTask>>,
        parent: Option<&dyn GraphTask>,
    ) -> Result<BTreeMap<String, Value>, TaskGraphError> {
        let results = self.process(tasks, parent).await?;
        Ok(results
            .into_iter()
            .map(|(key, result)| (key, result.output.unwrap_or(Value::Null)))
            .collect())
    }

    fn lock_state(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The throttle-exemption type set for tasks enqueued by `parent`:
    /// the parent's own type plus its recorded ancestors.
    fn ancestor_types_for(
        &self,
        state: &GraphState,
        parent: Option<&dyn GraphTask>,
    ) -> BTreeSet<String> {
        let Some(parent) = parent else {
            return BTreeSet::new();
        };
        let mut types = state
            .index
            .get(&parent.key())
            .map(|node| node.ancestor_types.clone())
            .unwrap_or_default();
        types.insert(parent.task_type().to_string());
        types
    }

    /// Recursively compute the dependency closure of the submitted tasks.
    /// Runs outside the state lock; `GraphTask::dependencies` is required
    /// to be deterministic per key.
    async fn expand(
        &self,
        tasks: &[Arc<dyn GraphTask>],
    ) -> Result<HashMap<String, Expanded>, TaskGraphError> {
        let mut closure: HashMap<String, Expanded> = HashMap::new();
        let mut queue: Vec<Arc<dyn GraphTask>> = tasks.to_vec();

        while let Some(task) = queue.pop() {
            let key = task.key();
            if closure.contains_key(&key) {
                continue;
            }
            let deps = task
                .dependencies()
                .await
                .map_err(|e| TaskGraphError::Dependencies(e.to_string()))?;
            let dep_keys: Vec<String> = deps.iter().map(|d| d.key()).collect();

            {
                let mut state = self.lock_state();
                state
                    .dependency_cache
                    .entry(key.clone())
                    .or_insert_with(|| deps.iter().map(|d| d.base_key()).collect());
            }

            closure.insert(key, Expanded { task, dep_keys });
            queue.extend(deps);
        }
        Ok(closure)
    }

    /// Insert one task (and, recursively, its dependencies) into the graph.
    fn insert_task(
        &self,
        state: &mut GraphState,
        key: &str,
        closure: &HashMap<String, Expanded>,
        ancestor_types: &BTreeSet<String>,
    ) {
        if state.index.contains_key(key) {
            // Identical key: coalesce onto the existing node.
            return;
        }

        let Some(expanded) = closure.get(key) else {
            return;
        };
        let task = expanded.task.clone();

        // A cached non-error result satisfies a non-forced add without
        // running the body; a fresh completion event carries it.
        if !task.force() {
            if let Some(cached) = state.result_cache.get_ok(key).cloned() {
                if !state.results.contains_key(key) {
                    state.results.insert(key.to_string(), cached.clone());
                    self.bus
                        .publish(TaskGraphEvent::TaskComplete { result: cached });
                }
                return;
            }
        }

        let base_key = task.base_key();
        let mut node = TaskNode {
            id: Uuid::new_v4(),
            task_type: task.task_type().to_string(),
            base_key: base_key.clone(),
            key: key.to_string(),
            description: task.description(),
            remaining_deps: BTreeSet::new(),
            dependants: BTreeSet::new(),
            dependency_results: TaskResults::new(),
            ancestor_types: ancestor_types.clone(),
            waiters: Vec::new(),
            started_at: None,
            task,
        };

        // Same base key, different params: serialize behind every indexed
        // predecessor (FIFO) and inherit their dependants. Same-base-key
        // nodes are excluded from inheritance; an edge both ways would
        // deadlock the pair.
        let predecessors: Vec<String> = state
            .index
            .values()
            .filter(|n| n.base_key == base_key && n.key != key)
            .map(|n| n.key.clone())
            .collect();
        for pred_key in &predecessors {
            node.remaining_deps.insert(pred_key.clone());
            let inherited: Vec<String> = state.index[pred_key]
                .dependants
                .iter()
                .filter(|d| {
                    state
                        .index
                        .get(*d)
                        .map(|n| n.base_key != base_key)
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            for dependant in inherited {
                if let Some(dep_node) = state.index.get_mut(&dependant) {
                    dep_node.remaining_deps.insert(key.to_string());
                    node.dependants.insert(dependant);
                }
            }
            if let Some(pred) = state.index.get_mut(pred_key) {
                pred.dependants.insert(key.to_string());
            }
            tracing::debug!(key, predecessor = %pred_key, "task enqueued behind predecessor");
        }

        state.index.insert(key.to_string(), node);
        self.bus.publish(TaskGraphEvent::TaskPending {
            key: key.to_string(),
            added_at: Utc::now(),
        });

        for dep_key in &expanded.dep_keys {
            self.insert_task(state, dep_key, closure, ancestor_types);
            if state.index.contains_key(dep_key) {
                if let Some(dep_node) = state.index.get_mut(dep_key) {
                    dep_node.dependants.insert(key.to_string());
                }
                if let Some(node) = state.index.get_mut(key) {
                    node.remaining_deps.insert(dep_key.clone());
                }
            } else if let Some(result) = state.results.get(dep_key).cloned() {
                // Dependency satisfied from cache: the edge is dropped.
                if let Some(node) = state.index.get_mut(key) {
                    node.dependency_results
                        .insert(result.base_key.clone(), result);
                }
            }
        }
    }

    /// Start every startable root. Called after each add, completion and
    /// failure, always under the state lock.
    fn pump(self: &Arc<Self>, state: &mut GraphState) {
        if state.index.is_empty() {
            if state.graph_active {
                state.graph_active = false;
                self.bus.publish(TaskGraphEvent::TaskGraphComplete {
                    completed_at: Utc::now(),
                });
            }
            return;
        }

        let mut roots: Vec<String> = state
            .index
            .values()
            .filter(|n| n.remaining_deps.is_empty() && !state.in_progress.contains(&n.key))
            .map(|n| n.key.clone())
            .collect();
        roots.sort();

        for key in roots {
            if state.in_progress.len() >= self.concurrency {
                break;
            }
            let node = &state.index[&key];
            let limit = node.task.concurrency_limit();
            let running_same_type = state
                .in_progress_types
                .get(&node.task_type)
                .copied()
                .unwrap_or(0);
            // A task enqueued by a same-type ancestor bypasses the
            // per-type ceiling; holding it back could deadlock the parent.
            let exempt = node.ancestor_types.contains(&node.task_type);
            if !exempt && running_same_type >= limit {
                continue;
            }

            let started_at = Utc::now();
            let task_type = node.task_type.clone();
            let version = node.task.version().version_string;
            let task = node.task.clone();
            let dependency_results = node.dependency_results.clone();

            state.in_progress.insert(key.clone());
            *state.in_progress_types.entry(task_type).or_insert(0) += 1;
            if let Some(node) = state.index.get_mut(&key) {
                node.started_at = Some(started_at);
            }
            self.bus.publish(TaskGraphEvent::TaskProcessing {
                key: key.clone(),
                version,
                started_at,
            });
            tracing::debug!(key = %key, "task processing");

            let graph = Arc::clone(self);
            tokio::spawn(async move {
                let outcome = task.process(&dependency_results).await;
                graph.finish(&key, outcome);
            });
        }
    }

    /// Record a task outcome, cascade cancellation on failure, notify
    /// waiters, and re-run the pump.
    fn finish(self: &Arc<Self>, key: &str, outcome: Result<Value, TaskError>) {
        let mut state = self.lock_state();

        let Some(mut node) = state.index.remove(key) else {
            return;
        };
        state.in_progress.remove(key);
        if let Some(count) = state.in_progress_types.get_mut(&node.task_type) {
            *count = count.saturating_sub(1);
        }

        let result = match outcome {
            Ok(output) => {
                let result = node.result(Some(output), None, true);
                state.result_cache.put(result.clone());
                tracing::info!(key = %key, "task complete");
                self.bus.publish(TaskGraphEvent::TaskComplete {
                    result: result.clone(),
                });
                let dependants: Vec<String> = node.dependants.iter().cloned().collect();
                for dependant in dependants {
                    if let Some(dep_node) = state.index.get_mut(&dependant) {
                        dep_node.remaining_deps.remove(key);
                        dep_node
                            .dependency_results
                            .insert(result.base_key.clone(), result.clone());
                    }
                }
                result
            }
            Err(error) => {
                let result = node.result(None, Some(error.to_string()), true);
                tracing::error!(key = %key, error = %error, "task failed");
                self.bus.publish(TaskGraphEvent::TaskError {
                    result: result.clone(),
                });
                self.cancel_dependants(&mut state, &node, key);
                result
            }
        };

        state.results.insert(key.to_string(), result.clone());
        for waiter in node.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }

        self.pump(&mut state);
    }

    /// Remove every transitive dependant of a failed node without running
    /// it. Cancelled nodes are recorded as failed.
    fn cancel_dependants(&self, state: &mut GraphState, failed: &TaskNode, failed_key: &str) {
        let mut queue: Vec<String> = failed.dependants.iter().cloned().collect();
        while let Some(cancel_key) = queue.pop() {
            let Some(mut cancelled) = state.index.remove(&cancel_key) else {
                continue;
            };
            queue.extend(cancelled.dependants.iter().cloned());
            tracing::warn!(
                key = %cancel_key,
                failed = %failed_key,
                "task cancelled after dependency failure"
            );
            let result = cancelled.result(
                None,
                Some(format!("aborted because dependency '{}' failed", failed_key)),
                false,
            );
            state.results.insert(cancel_key.clone(), result.clone());
            for waiter in cancelled.waiters.drain(..) {
                let _ = waiter.send(result.clone());
            }
        }
    }
}
