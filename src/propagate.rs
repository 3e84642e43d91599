//! Liveness propagation - second pass over a fully populated index
//!
//! 1. Seeding: modules with sources (2), `force` (3) or an explicit `live_*`
//!    property (4) have their `live` level raised.
//! 2. Closure: breadth-first over `out/` links, i.e. from a live module to every
//!    module that requires it. A dependent at level 0 moves to 1 and is queued;
//!    that transition is the only way onto the queue, so cycles terminate.
//! 3. Multiplatform: a project with more than one live module dir gets
//!    `multiplatform = true` in its project dir.
//!
//! The edge graph is read from disk once into memory; the walk itself never
//! lists directories.

use crate::layout::{IndexLayout, LINK_FILE, ModuleKey, ModuleNode, OUT_DIR, mangle_project_path};
use crate::marker::{
    DeterministicWrite, FORCE_FILE, LIVE_FILE, Liveness, MULTIPLATFORM_FILE, MarkerStore, VIRTUAL_FILE,
};
use crate::model::{PlatformModule, ProjectGraph};
use crate::populate::has_sources;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Outcome of one propagation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationStats {
    /// Module dirs whose level was set directly
    pub seeds: usize,
    /// Module dirs raised from 0 to 1 by the closure
    pub promoted: usize,
    pub multiplatform_projects: usize,
}

impl fmt::Display for PropagationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Propagation Statistics:")?;
        writeln!(f, "  Seeds: {}", self.seeds)?;
        writeln!(f, "  Promoted: {}", self.promoted)?;
        write!(f, "  Multiplatform projects: {}", self.multiplatform_projects)
    }
}

/// Property key marking a module as an explicit include.
pub fn explicit_live_property(project_path: &str, pair: &PlatformModule) -> String {
    format!("live_{}_{}", mangle_project_path(project_path), pair.key())
}

/// In-memory copy of the edge graph: module node -> its dependents.
#[derive(Debug, Default)]
struct EdgeGraph {
    dependents: HashMap<ModuleNode, Vec<ModuleNode>>,
    levels: HashMap<ModuleNode, Liveness>,
}

pub struct LivenessPropagator {
    layout: IndexLayout,
    store: Arc<MarkerStore>,
    properties: BTreeMap<String, String>,
}

impl LivenessPropagator {
    pub fn new(layout: IndexLayout, store: Arc<MarkerStore>, properties: BTreeMap<String, String>) -> Self {
        Self {
            layout,
            store,
            properties,
        }
    }

    pub fn run(&self, graph: &ProjectGraph) -> Result<PropagationStats> {
        let mut stats = PropagationStats {
            seeds: self.seed(graph)?,
            ..Default::default()
        };

        let mut edges = self.load_graph()?;
        stats.promoted = self.close(&mut edges)?;
        stats.multiplatform_projects = self.mark_multiplatform(&edges)?;

        tracing::debug!(
            seeds = stats.seeds,
            promoted = stats.promoted,
            multiplatform = stats.multiplatform_projects,
            "liveness propagation finished"
        );
        Ok(stats)
    }

    fn explicitly_live(&self, project_path: &str, pair: &PlatformModule) -> bool {
        self.properties
            .get(&explicit_live_property(project_path, pair))
            .is_some_and(|v| v.trim() == "true")
    }

    fn seed(&self, graph: &ProjectGraph) -> Result<usize> {
        let mut seeds = 0;
        for project in &graph.projects {
            for (platform, module) in project.variants() {
                let pair = PlatformModule::new(&platform.name, &module.name);
                let published = platform.published && module.published;
                let level = if self.explicitly_live(&project.path, &pair) {
                    Liveness::Explicit
                } else if !published {
                    continue;
                } else if module.force {
                    Liveness::Forced
                } else if has_sources(&project.dir, &pair).is_some() {
                    Liveness::HasSources
                } else {
                    continue;
                };

                let module_dir = self.layout.module_dir(&ModuleKey::new(&project.path, pair));
                self.store.raise_level(&module_dir.join(LIVE_FILE), level)?;
                self.store.write_always(DeterministicWrite::flag(
                    module_dir.join(MULTIPLATFORM_FILE),
                    project.multiplatform,
                ))?;
                self.store.write_always(DeterministicWrite::flag(
                    module_dir.join(VIRTUAL_FILE),
                    project.is_virtual,
                ))?;
                if module.force {
                    self.store
                        .write_always(DeterministicWrite::flag(module_dir.join(FORCE_FILE), true))?;
                }
                seeds += 1;
            }
        }
        Ok(seeds)
    }

    /// Read every module dir's level and `out/` links.
    fn load_graph(&self) -> Result<EdgeGraph> {
        let mut graph = EdgeGraph::default();
        for project_dir in sub_dirs(&self.layout.path_root())? {
            for module_dir in sub_dirs(&self.layout.path_root().join(&project_dir))? {
                let node = ModuleNode {
                    project_dir: project_dir.clone(),
                    module_dir,
                };
                let dir = node.dir(&self.layout);
                let level = self.store.read_level(&dir.join(LIVE_FILE))?;

                let mut dependents = Vec::new();
                let out = dir.join(OUT_DIR);
                for dependent_project in sub_dirs(&out)? {
                    for dependent_module in sub_dirs(&out.join(&dependent_project))? {
                        let link = out
                            .join(&dependent_project)
                            .join(&dependent_module)
                            .join(LINK_FILE);
                        let Some(value) = self.store.read(&link)? else {
                            continue;
                        };
                        let target = ModuleNode::from_link(&value).ok_or_else(|| Error::InvalidMarker {
                            path: link.clone(),
                            content: value.clone(),
                        })?;
                        dependents.push(target);
                    }
                }

                graph.levels.insert(node.clone(), level);
                graph.dependents.insert(node, dependents);
            }
        }
        Ok(graph)
    }

    /// Breadth-first closure over dependents. Every node already live is a root,
    /// so a re-run also reaches dependents added since the previous one.
    fn close(&self, graph: &mut EdgeGraph) -> Result<usize> {
        let mut roots: Vec<&ModuleNode> = graph
            .levels
            .iter()
            .filter(|(_, level)| level.is_live())
            .map(|(node, _)| node)
            .collect();
        roots.sort();

        let mut queue: VecDeque<ModuleNode> = roots.into_iter().cloned().collect();
        let mut visited: HashSet<ModuleNode> = queue.iter().cloned().collect();
        let mut promoted = 0;

        while let Some(node) = queue.pop_front() {
            let dependents = graph.dependents.get(&node).cloned().unwrap_or_default();
            for dependent in dependents {
                let level = match graph.levels.get(&dependent) {
                    Some(level) => *level,
                    None => self
                        .store
                        .read_level(&dependent.dir(&self.layout).join(LIVE_FILE))?,
                };
                if level != Liveness::Dead || !visited.insert(dependent.clone()) {
                    continue;
                }
                self.store
                    .raise_level(&dependent.dir(&self.layout).join(LIVE_FILE), Liveness::Reachable)?;
                graph.levels.insert(dependent.clone(), Liveness::Reachable);
                tracing::trace!(from = %node, to = %dependent, "promoted to reachable");
                promoted += 1;
                queue.push_back(dependent);
            }
        }
        Ok(promoted)
    }

    fn mark_multiplatform(&self, graph: &EdgeGraph) -> Result<usize> {
        let mut live_per_project: BTreeMap<&str, usize> = BTreeMap::new();
        for (node, level) in &graph.levels {
            if level.is_live() {
                *live_per_project.entry(node.project_dir.as_str()).or_default() += 1;
            }
        }

        let mut marked = 0;
        for (project_dir, live) in live_per_project {
            if live > 1 {
                let marker = self.layout.path_root().join(project_dir).join(MULTIPLATFORM_FILE);
                self.store.write_always(DeterministicWrite::flag(marker, true))?;
                marked += 1;
            }
        }
        Ok(marked)
    }
}

/// Names of the sub-directories of `dir`, sorted; empty when `dir` is missing.
fn sub_dirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeRecorder;
    use crate::model::{Module, Platform, Project};
    use tempfile::TempDir;

    fn key(project: &str, module: &str) -> ModuleKey {
        ModuleKey::new(project, PlatformModule::new("main", module))
    }

    struct Fixture {
        index: TempDir,
        work: TempDir,
        store: Arc<MarkerStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                index: TempDir::new().unwrap(),
                work: TempDir::new().unwrap(),
                store: Arc::new(MarkerStore::new()),
            }
        }

        fn layout(&self) -> IndexLayout {
            IndexLayout::new(self.index.path())
        }

        fn edge(&self, requestor: &ModuleKey, requested: &ModuleKey) {
            EdgeRecorder::new(self.layout(), self.store.clone())
                .record_edge(requestor, requested)
                .unwrap();
        }

        fn project(&self, path: &str, modules: &[&str], with_sources: &[&str]) -> Project {
            let dir = self.work.path().join(path.trim_start_matches(':'));
            let mut project = Project::new(path, &dir).with_platform(Platform::new("main"));
            for module in modules {
                project = project.with_module(Module::new(*module));
            }
            for module in with_sources {
                fs::create_dir_all(dir.join("src").join(module).join("java")).unwrap();
            }
            project
        }

        fn level(&self, key: &ModuleKey) -> Liveness {
            self.store
                .read_level(&self.layout().module_dir(key).join(LIVE_FILE))
                .unwrap()
        }

        fn propagate(&self, graph: &ProjectGraph, properties: BTreeMap<String, String>) -> PropagationStats {
            LivenessPropagator::new(self.layout(), self.store.clone(), properties)
                .run(graph)
                .unwrap()
        }
    }

    fn graph(projects: Vec<Project>) -> ProjectGraph {
        projects
            .into_iter()
            .fold(ProjectGraph::new("demo", "net.demo", "1.0", "/w"), |g, p| g.with_project(p))
    }

    #[test]
    fn test_closure_reaches_transitive_dependents() {
        let fx = Fixture::new();
        // app -> mid -> lib, lib has sources
        fx.edge(&key(":app", "main"), &key(":mid", "main"));
        fx.edge(&key(":mid", "main"), &key(":lib", "main"));
        let g = graph(vec![
            fx.project(":app", &["main"], &[]),
            fx.project(":mid", &["main"], &[]),
            fx.project(":lib", &["main"], &["main"]),
        ]);

        let stats = fx.propagate(&g, BTreeMap::new());
        assert_eq!(stats.seeds, 1);
        assert_eq!(stats.promoted, 2);
        assert_eq!(fx.level(&key(":lib", "main")), Liveness::HasSources);
        assert_eq!(fx.level(&key(":mid", "main")), Liveness::Reachable);
        assert_eq!(fx.level(&key(":app", "main")), Liveness::Reachable);
    }

    #[test]
    fn test_liveness_never_flows_to_dependencies() {
        let fx = Fixture::new();
        fx.edge(&key(":app", "main"), &key(":lib", "main"));
        let g = graph(vec![
            fx.project(":app", &["main"], &["main"]),
            fx.project(":lib", &["main"], &[]),
        ]);

        fx.propagate(&g, BTreeMap::new());
        assert_eq!(fx.level(&key(":lib", "main")), Liveness::Dead);
    }

    #[test]
    fn test_cycle_terminates() {
        let fx = Fixture::new();
        fx.edge(&key(":a", "main"), &key(":b", "main"));
        fx.edge(&key(":b", "main"), &key(":a", "main"));
        fx.edge(&key(":c", "main"), &key(":a", "main"));
        let g = graph(vec![
            fx.project(":a", &["main"], &[]),
            fx.project(":b", &["main"], &["main"]),
            fx.project(":c", &["main"], &[]),
        ]);

        let stats = fx.propagate(&g, BTreeMap::new());
        assert_eq!(stats.promoted, 2);
        assert_eq!(fx.level(&key(":a", "main")), Liveness::Reachable);
        assert_eq!(fx.level(&key(":b", "main")), Liveness::HasSources);
        assert_eq!(fx.level(&key(":c", "main")), Liveness::Reachable);
    }

    #[test]
    fn test_seed_levels_only_rise() {
        let fx = Fixture::new();
        fx.edge(&key(":app", "main"), &key(":lib", "main"));
        let mut app = fx.project(":app", &[], &[]);
        app = app.with_module(Module::new("main").forced());
        let g = graph(vec![app, fx.project(":lib", &["main"], &["main"])]);

        let mut props = BTreeMap::new();
        props.insert(
            explicit_live_property(":lib", &PlatformModule::new("main", "main")),
            "true".to_string(),
        );
        fx.propagate(&g, props);

        assert_eq!(fx.level(&key(":lib", "main")), Liveness::Explicit);
        // forced wins over the reachable contribution from lib
        assert_eq!(fx.level(&key(":app", "main")), Liveness::Forced);

        // a second run with fewer seeds never lowers anything
        fx.propagate(&g, BTreeMap::new());
        assert_eq!(fx.level(&key(":lib", "main")), Liveness::Explicit);
    }

    #[test]
    fn test_multiplatform_needs_two_live_variants() {
        let fx = Fixture::new();
        fx.edge(&key(":two", "main"), &key(":two", "api"));
        fx.edge(&key(":one", "main"), &key(":one", "api"));
        let g = graph(vec![
            fx.project(":two", &["main", "api"], &["api"]),
            fx.project(":one", &["main", "api"], &[]),
        ]);
        // :one gets a single live variant through an explicit include on main
        let mut props = BTreeMap::new();
        props.insert(
            explicit_live_property(":one", &PlatformModule::new("main", "main")),
            "true".to_string(),
        );

        let stats = fx.propagate(&g, props);
        assert_eq!(stats.multiplatform_projects, 1);
        let layout = fx.layout();
        assert!(fx.store.is_true(&layout.project_dir(":two").join(MULTIPLATFORM_FILE)).unwrap());
        assert!(!layout.project_dir(":one").join(MULTIPLATFORM_FILE).exists());
    }

    #[test]
    fn test_unparsable_link_is_reported() {
        let fx = Fixture::new();
        fx.edge(&key(":app", "main"), &key(":lib", "main"));
        let link = fx
            .layout()
            .module_dir(&key(":lib", "main"))
            .join("out/_app/main:main/link");
        fs::write(&link, "somewhere").unwrap();

        let err = LivenessPropagator::new(fx.layout(), fx.store.clone(), BTreeMap::new())
            .run(&graph(vec![]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMarker { .. }));
    }
}
