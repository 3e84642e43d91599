//! Async index coordinator
//!
//! One run per build identity (`<build>.indexed@<index dir>`):
//! `Running -> {Succeeded | Failed | TimedOut}`.
//!
//! [`Coordinator::index`] submits one population task per project to the
//! worker pool and returns immediately with an [`IndexHandle`]. A barrier
//! thread collects every task outcome (bounded by the configured timeout),
//! runs liveness propagation only when nothing failed, and resolves the handle
//! exactly once. Calling `index` again for a running or succeeded identity
//! returns the same handle.

pub mod deferred;
pub mod pool;
pub mod registry;

pub use deferred::Deferred;
pub use pool::{Barrier, TaskHandle, Tracker, WorkerPool};
pub use registry::{Begin, RunRegistry, RunState};

use crate::config::Settings;
use crate::layout::IndexLayout;
use crate::marker::MarkerStore;
use crate::model::ProjectGraph;
use crate::pattern::{PatternResolver, TemplateResolver};
use crate::populate::{PopulateProject, PopulateStats, Populator};
use crate::propagate::LivenessPropagator;
use crate::query::{IndexReader, SchemaIndex};
use crate::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Terminal outcome of one run, shared by every waiter.
pub type IndexOutcome = std::result::Result<Arc<SchemaIndex>, Arc<Error>>;

/// Identity a run is registered under.
pub fn build_identity(build_name: &str, index_dir: &Path) -> String {
    format!("{}.indexed@{}", build_name, index_dir.display())
}

/// Handle to one run's eventual [`SchemaIndex`].
#[derive(Debug, Clone)]
pub struct IndexHandle {
    build: Arc<str>,
    outcome: Arc<Deferred<IndexOutcome>>,
}

impl IndexHandle {
    pub(crate) fn new(build: &str) -> Self {
        Self {
            build: Arc::from(build),
            outcome: Arc::new(Deferred::new()),
        }
    }

    pub fn build_id(&self) -> &str {
        &self.build
    }

    /// Block until the run resolves.
    pub fn wait(&self) -> IndexOutcome {
        self.outcome.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<IndexOutcome> {
        self.outcome.wait_timeout(timeout)
    }

    pub fn try_get(&self) -> Option<IndexOutcome> {
        self.outcome.try_get()
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_resolved()
    }

    /// Whether both handles observe the same run.
    pub fn same_run(&self, other: &IndexHandle) -> bool {
        Arc::ptr_eq(&self.outcome, &other.outcome)
    }

    fn resolve(&self, outcome: IndexOutcome) {
        if !self.outcome.resolve(outcome) {
            tracing::warn!(build = %self.build, "index handle was already resolved");
        }
    }
}

pub struct Coordinator {
    settings: Settings,
    registry: Arc<RunRegistry>,
    store: Arc<MarkerStore>,
    pool: Arc<WorkerPool>,
    populator: Option<Arc<dyn PopulateProject>>,
}

impl Coordinator {
    pub fn new(settings: Settings, registry: Arc<RunRegistry>) -> Result<Self> {
        let pool = WorkerPool::new(settings.workers, "xindex-worker")?;
        Ok(Self {
            settings,
            registry,
            store: Arc::new(MarkerStore::new()),
            pool: Arc::new(pool),
            populator: None,
        })
    }

    /// Replace the default [`Populator`].
    pub fn with_populator(mut self, populator: Arc<dyn PopulateProject>) -> Self {
        self.populator = Some(populator);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn layout(&self) -> IndexLayout {
        IndexLayout::new(&self.settings.index_dir)
    }

    fn resolver(&self) -> Arc<dyn PatternResolver> {
        Arc::new(TemplateResolver::from_properties(&self.settings.properties))
    }

    /// Start (or join) the run for `graph`.
    pub fn index(&self, graph: Arc<ProjectGraph>) -> IndexHandle {
        let id = build_identity(&graph.build_name, &self.settings.index_dir);
        let handle = match self.registry.begin(&id) {
            Begin::Existing(handle) => {
                tracing::info!(build = %id, "index already requested, joining existing run");
                return handle;
            }
            Begin::Started(handle) => handle,
        };

        tracing::info!(
            build = %id,
            projects = graph.projects.len(),
            workers = self.pool.size(),
            "indexing started"
        );

        let populator: Arc<dyn PopulateProject> = match &self.populator {
            Some(populator) => populator.clone(),
            None => Arc::new(Populator::new(
                self.layout(),
                self.store.clone(),
                self.resolver(),
                graph.coordinates(),
            )),
        };

        let tracker = Arc::new(Tracker::new());
        for index in 0..graph.projects.len() {
            let graph = graph.clone();
            let populator = populator.clone();
            let label = graph.projects[index].path.clone();
            self.pool.submit(&tracker, label, move || {
                populator.populate_project(&graph.projects[index])
            });
        }

        let run = Run {
            id,
            graph,
            settings: self.settings.clone(),
            registry: self.registry.clone(),
            store: self.store.clone(),
            resolver: self.resolver(),
            handle: handle.clone(),
            tracker,
            started: Instant::now(),
        };
        let spawned = thread::Builder::new()
            .name("xindex-barrier".to_string())
            .spawn({
                let handle = handle.clone();
                let id = run.id.clone();
                let registry = run.registry.clone();
                move || {
                    if let Err(err) = run.complete() {
                        tracing::error!(build = %id, error = %err, "indexing failed");
                        registry.finish(&id, RunState::Failed);
                        handle.resolve(Err(Arc::new(err)));
                    }
                }
            });
        if let Err(err) = spawned {
            self.registry.finish(handle.build_id(), RunState::Failed);
            handle.resolve(Err(Arc::new(Error::Io(err))));
        }
        handle
    }
}

/// Everything the barrier thread needs for one run.
struct Run {
    id: String,
    graph: Arc<ProjectGraph>,
    settings: Settings,
    registry: Arc<RunRegistry>,
    store: Arc<MarkerStore>,
    resolver: Arc<dyn PatternResolver>,
    handle: IndexHandle,
    tracker: Arc<Tracker<PopulateStats>>,
    started: Instant,
}

impl Run {
    /// Wait for population, then propagate or fail. Returns `Err` only for
    /// failures that have not been recorded yet.
    fn complete(self) -> Result<()> {
        let deadline = self.started + self.settings.timeout;
        let finished = match self.tracker.wait_all(deadline) {
            Barrier::Drained(finished) => finished,
            Barrier::TimedOut { finished, outstanding } => {
                for task in &outstanding {
                    tracing::warn!(build = %self.id, task = %task, "abandoning unfinished indexing task");
                }
                let err = Error::Timeout {
                    build: self.id.clone(),
                    millis: self.settings.timeout.as_millis() as u64,
                    outstanding: outstanding.len(),
                };
                tracing::error!(build = %self.id, completed = finished.len(), "{}", err);
                self.registry.finish(&self.id, RunState::TimedOut);
                self.handle.resolve(Err(Arc::new(err)));
                return Ok(());
            }
        };

        let mut populated = PopulateStats::default();
        let mut failures = Vec::new();
        for task in finished {
            match task.result {
                Ok(stats) => populated += stats,
                Err(err) => {
                    tracing::debug!(build = %self.id, task = %task.handle, error = %err, "indexing task failed");
                    failures.push(err);
                }
            }
        }

        if !failures.is_empty() {
            let err = classify_failures(&self.id, failures);
            tracing::error!(build = %self.id, "{}", err);
            self.registry.finish(&self.id, RunState::Failed);
            self.handle.resolve(Err(Arc::new(err)));
            return Ok(());
        }

        let layout = IndexLayout::new(&self.settings.index_dir);
        let propagation = LivenessPropagator::new(
            layout.clone(),
            self.store.clone(),
            self.settings.properties.clone(),
        )
        .run(&self.graph)?;

        match self.registry.state(&self.id) {
            Some(RunState::Running) => {}
            other if self.settings.strict => {
                return Err(Error::Resolution(format!(
                    "Finished indexing {} but the run was marked {}",
                    self.id,
                    other.map_or_else(|| "absent".to_string(), |s| s.to_string())
                )));
            }
            other => {
                tracing::info!(build = %self.id, state = ?other, "finished indexing a run that was no longer marked running");
            }
        }

        let reader = Arc::new(IndexReader::new(
            layout,
            self.store.clone(),
            self.resolver.clone(),
            self.graph.clone(),
        ));
        let index = SchemaIndex::new(self.graph.coordinates(), populated, propagation, reader);
        tracing::info!(
            build = %self.id,
            modules = populated.modules,
            edges = populated.edges,
            seeds = index.propagation.seeds,
            promoted = index.propagation.promoted,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "indexing finished"
        );

        self.registry.finish(&self.id, RunState::Succeeded);
        self.handle.resolve(Ok(Arc::new(index)));
        Ok(())
    }
}

/// One failure is surfaced with the build context; several are aggregated.
fn classify_failures(build: &str, mut failures: Vec<Error>) -> Error {
    if failures.len() == 1 {
        if let Some(cause) = failures.pop() {
            return Error::IndexFailed {
                message: format!("Indexing failed for {}", build),
                source: Box::new(cause),
            };
        }
    }
    Error::Aggregate {
        message: format!("Indexing failures encountered for {}", build),
        causes: failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Module, Platform, Project};
    use tempfile::TempDir;

    fn graph(root: &Path, names: &[&str]) -> Arc<ProjectGraph> {
        let graph = names.iter().fold(ProjectGraph::new("demo", "net.demo", "1.0", root), |g, name| {
            g.with_project(
                Project::new(format!(":{name}"), root.join(name))
                    .with_platform(Platform::new("main"))
                    .with_module(Module::new("main")),
            )
        });
        Arc::new(graph)
    }

    #[test]
    fn test_build_identity() {
        assert_eq!(build_identity("demo", Path::new("/idx")), "demo.indexed@/idx");
    }

    #[test]
    fn test_index_succeeds_and_registers_done() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(RunRegistry::new());
        let coordinator =
            Coordinator::new(Settings::with_index_dir(dir.path().join("idx")), registry.clone()).unwrap();

        let handle = coordinator.index(graph(dir.path(), &["a", "b"]));
        let index = handle.wait().unwrap();
        assert_eq!(index.build_name(), "demo");
        assert_eq!(index.populated.modules, 2);
        assert_eq!(registry.property(handle.build_id()), Some("done"));
    }

    #[test]
    fn test_second_index_call_joins_the_first() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(RunRegistry::new());
        let coordinator =
            Coordinator::new(Settings::with_index_dir(dir.path().join("idx")), registry).unwrap();
        let graph = graph(dir.path(), &["a"]);

        let first = coordinator.index(graph.clone());
        let second = coordinator.index(graph);
        assert!(first.same_run(&second));
        let one = first.wait().unwrap();
        let two = second.wait().unwrap();
        assert!(Arc::ptr_eq(&one, &two));
    }

    #[test]
    fn test_classify_single_and_multiple_failures() {
        let one = classify_failures("b", vec![Error::Resolution("x".into())]);
        assert!(matches!(one, Error::IndexFailed { .. }));
        assert_eq!(one.causes().len(), 1);

        let many = classify_failures(
            "b",
            vec![Error::Resolution("x".into()), Error::Resolution("y".into())],
        );
        assert!(matches!(many, Error::Aggregate { ref causes, .. } if causes.len() == 2));
    }
}
