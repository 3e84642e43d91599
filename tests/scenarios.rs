//! End-to-end indexing runs against temporary project trees.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use xindex::populate::{PopulateProject, PopulateStats};
use xindex::{
    Coordinator, Dependency, Error, IndexReader, Module, Platform, PlatformModule, Project,
    ProjectGraph, RunRegistry, Settings,
};

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn index_dir(&self) -> PathBuf {
        self.root().join("build/xindex")
    }

    fn settings(&self) -> Settings {
        Settings::with_index_dir(self.index_dir())
    }

    /// Project `:name` with a single `main:<module>` variant.
    fn project(&self, name: &str, module: Module) -> Project {
        Project::new(format!(":{name}"), self.root().join(name))
            .with_platform(Platform::new("main"))
            .with_module(module)
    }

    fn add_sources(&self, name: &str, source_set: &str) {
        fs::create_dir_all(self.root().join(name).join("src").join(source_set).join("java")).unwrap();
    }

    fn graph(&self, projects: Vec<Project>) -> Arc<ProjectGraph> {
        let graph = projects
            .into_iter()
            .fold(ProjectGraph::new("demo", "net.demo", "1.0", self.root()), |g, p| g.with_project(p));
        Arc::new(graph)
    }

    fn module_dir(&self, project: &str, pair: &str) -> PathBuf {
        self.index_dir().join("path").join(format!("_{project}")).join(pair)
    }

    fn read(&self, path: impl AsRef<Path>) -> String {
        fs::read_to_string(path).unwrap()
    }

    fn run(&self, graph: Arc<ProjectGraph>) -> Result<Arc<xindex::SchemaIndex>, Arc<Error>> {
        Coordinator::new(self.settings(), Arc::new(RunRegistry::new()))
            .unwrap()
            .index(graph)
            .wait()
    }
}

fn jre(module: &str) -> PlatformModule {
    PlatformModule::new("main", module)
}

fn app_requires_lib(ws: &Workspace, app_module: Module) -> Arc<ProjectGraph> {
    ws.add_sources("lib", "jre");
    let app = ws
        .project("app", app_module)
        .with_dependency(Dependency::project(jre("jre"), ":lib"));
    let lib = ws.project("lib", Module::new("jre"));
    ws.graph(vec![app, lib])
}

#[test]
fn test_sources_make_dependents_reachable() {
    let ws = Workspace::new();
    let index = ws.run(app_requires_lib(&ws, Module::new("jre"))).unwrap();

    let app = ws.module_dir("app", "main:jre");
    let lib = ws.module_dir("lib", "main:jre");
    assert_eq!(ws.read(lib.join("live")), "2");
    assert_eq!(ws.read(app.join("live")), "1");
    assert_eq!(ws.read(app.join("in/_lib/main:jre/link")), "../../_lib/main:jre");
    assert_eq!(ws.read(lib.join("out/_app/main:jre/link")), "../../_app/main:jre");

    assert_eq!(index.propagation.seeds, 1);
    assert_eq!(index.propagation.promoted, 1);
}

#[test]
fn test_force_outranks_propagation() {
    let ws = Workspace::new();
    ws.run(app_requires_lib(&ws, Module::new("jre").forced())).unwrap();

    assert_eq!(ws.read(ws.module_dir("app", "main:jre").join("live")), "3");
    assert_eq!(ws.read(ws.module_dir("lib", "main:jre").join("live")), "2");
}

#[test]
fn test_external_coordinate_is_a_leaf() {
    let ws = Workspace::new();
    let app = ws
        .project("app", Module::new("main"))
        .with_dependency(Dependency::external(jre("main"), "com.example", "widgets", "1.2.0"));
    let index = ws.run(ws.graph(vec![app])).unwrap();

    let coord = ws.index_dir().join("coord/net.demo/app/1.0");
    assert_eq!(ws.read(coord.join("com.example:widgets:1.2.0")), "com.example:widgets:1.2.0");

    let path_root = ws.index_dir().join("path");
    let projects: Vec<_> = fs::read_dir(&path_root).unwrap().flatten().map(|e| e.file_name()).collect();
    assert_eq!(projects, vec![std::ffi::OsString::from("_app")]);
    assert!(!ws.module_dir("app", "main:main").join("in").exists());
    assert!(!ws.module_dir("app", "main:main").join("out").exists());

    let entries = index.get_entries(Some(":app"), &jre("main")).unwrap();
    assert_eq!(entries.external, vec!["com.example:widgets:1.2.0".to_string()]);
    assert!(entries.has_explicit_dependencies());
}

#[test]
fn test_concurrent_population_is_order_independent() {
    let ws = Workspace::new();
    let graph = || {
        let a = ws
            .project("a", Module::new("main"))
            .with_dependency(Dependency::project(jre("main"), ":b"));
        let b = ws.project("b", Module::new("main"));
        ws.graph(vec![a, b])
    };

    let first = ws.run(graph()).unwrap();
    let digest = first.reader().fingerprint().unwrap();
    let in_link = ws.read(ws.module_dir("a", "main:main").join("in/_b/main:main/link"));
    let out_link = ws.read(ws.module_dir("b", "main:main").join("out/_a/main:main/link"));

    for _ in 0..3 {
        let again = ws.run(graph()).unwrap();
        assert_eq!(again.reader().fingerprint().unwrap(), digest);
    }
    assert_eq!(ws.read(ws.module_dir("a", "main:main").join("in/_b/main:main/link")), in_link);
    assert_eq!(ws.read(ws.module_dir("b", "main:main").join("out/_a/main:main/link")), out_link);
}

#[test]
fn test_one_failing_project_fails_the_run() {
    let ws = Workspace::new();
    let mut projects = Vec::new();
    for i in 0..9 {
        let name = format!("p{i}");
        ws.add_sources(&name, "main");
        projects.push(ws.project(&name, Module::new("main")));
    }
    let mut broken = Module::new("main");
    broken.publish_pattern = Some("$name-$nonsense".into());
    projects.push(ws.project("broken", broken));

    let registry = Arc::new(RunRegistry::new());
    let coordinator = Coordinator::new(ws.settings(), registry.clone()).unwrap();
    let handle = coordinator.index(ws.graph(projects));
    let err = handle.wait().unwrap_err();

    match err.as_ref() {
        Error::IndexFailed { source, .. } => {
            assert!(matches!(source.as_ref(), Error::Resolution(msg) if msg.contains(":broken")));
        }
        other => panic!("expected a single wrapped failure, got {other}"),
    }
    assert_eq!(registry.property(handle.build_id()), Some("failed"));

    // the other projects' entries stay on disk, unpropagated
    for i in 0..9 {
        let module_dir = ws.module_dir(&format!("p{i}"), "main:main");
        assert_eq!(ws.read(module_dir.join("live")), "0");
        assert_eq!(ws.read(module_dir.join("publish")), "true");
    }
}

#[test]
fn test_multiple_failures_are_aggregated() {
    let ws = Workspace::new();
    let broken = |name: &str| {
        let mut module = Module::new("main");
        module.publish_pattern = Some("$oops".into());
        ws.project(name, module)
    };
    let err = ws
        .run(ws.graph(vec![broken("x"), broken("y"), ws.project("ok", Module::new("main"))]))
        .unwrap_err();

    match err.as_ref() {
        Error::Aggregate { causes, .. } => assert_eq!(causes.len(), 2),
        other => panic!("expected an aggregate failure, got {other}"),
    }
}

struct SlowPopulator {
    delay: Duration,
}

impl PopulateProject for SlowPopulator {
    fn populate_project(&self, _project: &Project) -> xindex::Result<PopulateStats> {
        thread::sleep(self.delay);
        Ok(PopulateStats::default())
    }
}

#[test]
fn test_slow_tasks_time_out() {
    let ws = Workspace::new();
    let mut settings = ws.settings();
    settings.timeout = Duration::from_millis(100);
    let registry = Arc::new(RunRegistry::new());
    let coordinator = Coordinator::new(settings, registry.clone())
        .unwrap()
        .with_populator(Arc::new(SlowPopulator {
            delay: Duration::from_secs(2),
        }));

    let started = Instant::now();
    let handle = coordinator.index(ws.graph(vec![ws.project("slow", Module::new("main"))]));
    let err = handle.wait().unwrap_err();

    assert!(matches!(err.as_ref(), Error::Timeout { outstanding: 1, millis: 100, .. }));
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(registry.property(handle.build_id()), Some("failed"));
}

#[test]
fn test_reindexing_is_idempotent() {
    let ws = Workspace::new();
    let graph = app_requires_lib(&ws, Module::new("jre"));

    let first = ws.run(graph.clone()).unwrap();
    let digest = first.reader().fingerprint().unwrap();
    let second = ws.run(graph).unwrap();
    assert_eq!(second.reader().fingerprint().unwrap(), digest);
    assert_eq!(second.propagation.promoted, 0);
}

#[test]
fn test_multiplatform_flag() {
    let ws = Workspace::new();
    ws.add_sources("duo", "api");
    ws.add_sources("solo", "api");
    let duo = ws
        .project("duo", Module::new("main"))
        .with_module(Module::new("api"))
        .with_dependency(Dependency::internal(jre("main"), "api"));
    let solo = ws
        .project("solo", Module::new("main"))
        .with_module(Module::new("api"));
    ws.run(ws.graph(vec![duo, solo])).unwrap();

    let project_dir = |name: &str| ws.index_dir().join("path").join(format!("_{name}"));
    assert_eq!(ws.read(project_dir("duo").join("multiplatform")), "true");
    assert!(!project_dir("solo").join("multiplatform").exists());
}

#[test]
fn test_declared_multiplatform_needs_two_live_variants() {
    let ws = Workspace::new();
    ws.add_sources("solo", "main");
    let mut solo = ws.project("solo", Module::new("main"));
    solo.multiplatform = true;
    let index = ws.run(ws.graph(vec![solo])).unwrap();

    let project_dir = ws.index_dir().join("path/_solo");
    assert_eq!(ws.read(project_dir.join("main:main/live")), "2");
    assert!(!project_dir.join("multiplatform").exists());
    assert_eq!(index.propagation.multiplatform_projects, 0);
}

#[test]
fn test_divergent_link_fails_the_owning_task() {
    let ws = Workspace::new();
    let graph = app_requires_lib(&ws, Module::new("jre"));
    let link = ws.module_dir("app", "main:jre").join("in/_lib/main:jre/link");
    fs::create_dir_all(link.parent().unwrap()).unwrap();
    fs::write(&link, "../../_other/main:jre").unwrap();

    let registry = Arc::new(RunRegistry::new());
    let handle = Coordinator::new(ws.settings(), registry.clone()).unwrap().index(graph);
    let err = handle.wait().unwrap_err();

    match err.as_ref() {
        Error::IndexFailed { source, .. } => {
            assert!(matches!(source.as_ref(), Error::LinkDivergence { existing, .. } if existing == "../../_other/main:jre"));
        }
        other => panic!("expected a single wrapped failure, got {other}"),
    }
    assert_eq!(registry.property(handle.build_id()), Some("failed"));
    // lib has sources but nothing was propagated
    assert_eq!(ws.read(ws.module_dir("lib", "main:jre").join("live")), "0");
}

#[test]
fn test_unreadable_index_fails_propagation() {
    let ws = Workspace::new();
    let link = ws.module_dir("lib", "main:main").join("out/_ghost/main:main/link");
    fs::create_dir_all(link.parent().unwrap()).unwrap();
    fs::write(&link, "somewhere").unwrap();

    let registry = Arc::new(RunRegistry::new());
    let handle = Coordinator::new(ws.settings(), registry.clone())
        .unwrap()
        .index(ws.graph(vec![ws.project("lib", Module::new("main"))]));
    let err = handle.wait().unwrap_err();

    assert!(matches!(err.as_ref(), Error::InvalidMarker { content, .. } if content == "somewhere"));
    assert_eq!(registry.property(handle.build_id()), Some("failed"));
}

fn forgotten_run(strict: bool) -> (xindex::IndexHandle, Arc<RunRegistry>) {
    let ws = Workspace::new();
    let mut settings = ws.settings();
    settings.strict = strict;
    let registry = Arc::new(RunRegistry::new());
    let coordinator = Coordinator::new(settings, registry.clone())
        .unwrap()
        .with_populator(Arc::new(SlowPopulator {
            delay: Duration::from_millis(300),
        }));

    let handle = coordinator.index(ws.graph(vec![ws.project("a", Module::new("main"))]));
    assert!(!handle.is_resolved());
    assert!(handle.try_get().is_none());
    assert!(handle.wait_timeout(Duration::from_millis(10)).is_none());

    let registered = registry.handle(handle.build_id()).unwrap();
    assert!(registered.same_run(&handle));
    assert_eq!(registry.forget(handle.build_id()), Some(xindex::RunState::Running));

    assert!(handle.wait_timeout(Duration::from_secs(10)).is_some());
    assert!(handle.is_resolved());
    (handle, registry)
}

#[test]
fn test_strict_mode_rejects_a_run_no_longer_marked_running() {
    let (handle, registry) = forgotten_run(true);
    let err = handle.try_get().unwrap().unwrap_err();
    assert!(matches!(err.as_ref(), Error::Resolution(msg) if msg.contains("absent")));
    assert_eq!(registry.property(handle.build_id()), None);
}

#[test]
fn test_lenient_mode_finishes_a_run_no_longer_marked_running() {
    let (handle, _registry) = forgotten_run(false);
    let index = handle.try_get().unwrap().unwrap();
    assert_eq!(index.build_name(), "demo");
}

#[test]
fn test_reader_before_and_after_resolution() {
    let ws = Workspace::new();
    let graph = app_requires_lib(&ws, Module::new("jre"));
    let index = ws.run(graph.clone()).unwrap();

    let reader: &IndexReader = index.reader();
    assert!(reader.check_live(":lib", &jre("jre")).unwrap());
    // app is reachable but nothing live consumes it
    assert!(!reader.check_live(":app", &jre("jre")).unwrap());
    assert!(index.has_entries(Some(":app"), &jre("jre")).unwrap());
    assert!(reader.dependency_exists("net.demo", "lib-jre", "1.0"));

    let resolved = index.resolve("net.demo", "lib-jre", "1.0").unwrap().unwrap();
    assert_eq!(resolved.sources.as_deref(), Some("path/_lib/main:jre"));
    assert_eq!(resolved.live, xindex::Liveness::HasSources);
}
