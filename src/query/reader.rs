//! Index reader - cached query surface over the on-disk index
//!
//! Results are memoized per `(project, platform, module)` and per coordinate.
//! Reads taken before the owning run resolves see whatever was flushed so far;
//! [`IndexReader::clear`] drops the caches.

use crate::layout::{
    IN_DIR, IndexLayout, LINK_FILE, ModuleKey, ModuleNode, OUT_DIR, demangle_project_path,
};
use crate::marker::{LIVE_FILE, Liveness, MULTIPLATFORM_FILE, MarkerStore, SOURCES_FILE};
use crate::model::{PlatformModule, ProjectGraph, default_project_name};
use crate::pattern::{PatternContext, PatternResolver};
use crate::populate::{INTERNAL_ENTRY_DIR, PROJECT_ENTRY_DIR};
use crate::Result;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// A project dependency recorded under a coordinate dir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectEntry {
    /// Project path of the dependency (`:lib`)
    pub project: String,
    /// Effective `platform:module` depended upon
    pub target: String,
}

/// Everything the index knows about one coordinate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexResult {
    pub coordinate: String,
    pub internal: Vec<String>,
    pub external: Vec<String>,
    pub projects: Vec<ProjectEntry>,
    pub unknown: Vec<String>,
    /// `path/<project>/<platform:module>` of the module holding sources
    pub sources: Option<String>,
    pub live: Liveness,
}

impl IndexResult {
    pub fn has_entries(&self) -> bool {
        !self.internal.is_empty()
            || !self.external.is_empty()
            || !self.projects.is_empty()
            || !self.unknown.is_empty()
            || self.sources.is_some()
    }

    pub fn has_explicit_dependencies(&self) -> bool {
        !self.projects.is_empty() || !self.external.is_empty()
    }

    pub fn has_sources(&self) -> bool {
        self.sources.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    project: Option<String>,
    variant: PlatformModule,
}

pub struct IndexReader {
    layout: IndexLayout,
    store: Arc<MarkerStore>,
    resolver: Arc<dyn PatternResolver>,
    graph: Arc<ProjectGraph>,
    entries: DashMap<EntryKey, Arc<IndexResult>>,
    coordinates: DashMap<String, Arc<IndexResult>>,
    live: DashMap<ModuleNode, bool>,
}

impl IndexReader {
    pub fn new(
        layout: IndexLayout,
        store: Arc<MarkerStore>,
        resolver: Arc<dyn PatternResolver>,
        graph: Arc<ProjectGraph>,
    ) -> Self {
        Self {
            layout,
            store,
            resolver,
            graph,
            entries: DashMap::new(),
            coordinates: DashMap::new(),
            live: DashMap::new(),
        }
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    /// Coordinate dir a `(project, platform, module)` triple publishes to.
    /// A missing project means the root project `:`.
    pub fn coordinate_dir(&self, project: Option<&str>, variant: &PlatformModule) -> Result<PathBuf> {
        let path = project.unwrap_or(":");
        let declared = self.graph.project(path);
        let project_name = match declared {
            Some(project) => project.published_name(&self.graph.build_name),
            None => default_project_name(path, &self.graph.build_name),
        };
        let platform_pattern = declared
            .and_then(|p| p.platforms.iter().find(|pl| pl.name == variant.platform))
            .and_then(|pl| pl.publish_pattern.as_deref());
        let module_pattern = declared
            .and_then(|p| p.modules.iter().find(|m| m.name == variant.module))
            .and_then(|m| m.publish_pattern.as_deref());

        let ctx = PatternContext {
            build_name: &self.graph.build_name,
            project_name: &project_name,
            group: &self.graph.group,
            version: &self.graph.version,
            platform: &variant.platform,
            module: &variant.module,
        };
        let group = self.resolver.resolve_group(platform_pattern, &ctx)?;
        let name = self.resolver.resolve_name(module_pattern, &ctx)?;
        Ok(self.layout.coord_dir(&group, &name, &self.graph.version))
    }

    pub fn get_entries(&self, project: Option<&str>, variant: &PlatformModule) -> Result<Arc<IndexResult>> {
        let key = EntryKey {
            project: project.map(str::to_string),
            variant: variant.clone(),
        };
        if let Some(hit) = self.entries.get(&key) {
            return Ok(hit.clone());
        }

        let coord_dir = self.coordinate_dir(project, variant)?;
        let mut result = self.read_coordinate(&coord_dir)?;
        let module = ModuleKey::new(project.unwrap_or(":"), variant.clone());
        result.live = self
            .store
            .read_level(&self.layout.module_dir(&module).join(LIVE_FILE))?;

        let result = Arc::new(result);
        self.entries.insert(key, result.clone());
        Ok(result)
    }

    pub fn has_entries(&self, project: Option<&str>, variant: &PlatformModule) -> Result<bool> {
        Ok(self.get_entries(project, variant)?.has_entries())
    }

    /// Entries of a published coordinate, `None` when nothing publishes it.
    pub fn resolve(&self, group: &str, name: &str, version: &str) -> Result<Option<Arc<IndexResult>>> {
        let literal = format!("{}:{}:{}", group, name, version);
        if let Some(hit) = self.coordinates.get(&literal) {
            return Ok(Some(hit.clone()));
        }

        let coord_dir = self.layout.coord_dir(group, name, version);
        if !coord_dir.is_dir() {
            return Ok(None);
        }
        let mut result = self.read_coordinate(&coord_dir)?;
        result.coordinate = literal.clone();
        if let Some(pointer) = &result.sources {
            result.live = self
                .store
                .read_level(&self.layout.root().join(pointer).join(LIVE_FILE))?;
        }

        let result = Arc::new(result);
        self.coordinates.insert(literal, result.clone());
        Ok(Some(result))
    }

    pub fn dependency_exists(&self, group: &str, name: &str, version: &str) -> bool {
        self.layout.coord_dir(group, name, version).is_dir()
    }

    fn read_coordinate(&self, coord_dir: &Path) -> Result<IndexResult> {
        let mut result = IndexResult {
            coordinate: coordinate_of(&self.layout, coord_dir),
            ..Default::default()
        };

        for (name, is_dir) in list_dir(coord_dir)? {
            let path = coord_dir.join(&name);
            if is_dir && name == PROJECT_ENTRY_DIR {
                for (entry, _) in list_dir(&path)? {
                    let target = self.store.read(&path.join(&entry))?.unwrap_or_default();
                    result.projects.push(ProjectEntry {
                        project: demangle_project_path(&entry),
                        target,
                    });
                }
            } else if is_dir && name == INTERNAL_ENTRY_DIR {
                result
                    .internal
                    .extend(list_dir(&path)?.into_iter().map(|(entry, _)| entry));
            } else if is_dir {
                result.unknown.push(name);
            } else if name == SOURCES_FILE {
                result.sources = self.store.read(&path)?;
            } else {
                // external literal; the file name spells it when the content is missing
                let literal = self.store.read(&path)?.unwrap_or_default();
                result.external.push(if literal.is_empty() { name } else { literal });
            }
        }
        Ok(result)
    }

    /// Whether a module is actually used.
    ///
    /// Levels 2 and up are live. A level-1 module is live when one of its
    /// dependencies is live and a chain of dependents leads to a module at
    /// level 2 or higher.
    pub fn check_live(&self, project: &str, variant: &PlatformModule) -> Result<bool> {
        let key = ModuleKey::new(project, variant.clone());
        let dir = self.layout.module_dir(&key);
        let node = ModuleNode {
            project_dir: dir_name(dir.parent()),
            module_dir: dir_name(Some(&dir)),
        };
        self.node_live(&node)
    }

    fn node_live(&self, node: &ModuleNode) -> Result<bool> {
        if let Some(hit) = self.live.get(node) {
            return Ok(*hit);
        }

        let level = self.level(node)?;
        let live = match level {
            Liveness::Dead => false,
            Liveness::Reachable => {
                let mut requires_live = false;
                for dependency in self.links(node, IN_DIR)? {
                    if self.level(&dependency)?.is_live() {
                        requires_live = true;
                        break;
                    }
                }
                requires_live && self.consumed_by_seed(node)?
            }
            _ => true,
        };

        self.live.insert(node.clone(), live);
        Ok(live)
    }

    /// Breadth-first over dependents looking for a module at level >= 2.
    fn consumed_by_seed(&self, start: &ModuleNode) -> Result<bool> {
        let mut visited = HashSet::from([start.clone()]);
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(node) = queue.pop_front() {
            for dependent in self.links(&node, OUT_DIR)? {
                if !visited.insert(dependent.clone()) {
                    continue;
                }
                if self.level(&dependent)? >= Liveness::HasSources {
                    return Ok(true);
                }
                queue.push_back(dependent);
            }
        }
        Ok(false)
    }

    fn level(&self, node: &ModuleNode) -> Result<Liveness> {
        self.store.read_level(&node.dir(&self.layout).join(LIVE_FILE))
    }

    fn links(&self, node: &ModuleNode, direction: &str) -> Result<Vec<ModuleNode>> {
        let edges = node.dir(&self.layout).join(direction);
        let mut nodes = Vec::new();
        for (project_dir, is_dir) in list_dir(&edges)? {
            if !is_dir {
                continue;
            }
            for (module_dir, _) in list_dir(&edges.join(&project_dir))? {
                let link = edges.join(&project_dir).join(&module_dir).join(LINK_FILE);
                if let Some(target) = self.store.read(&link)?.as_deref().and_then(ModuleNode::from_link) {
                    nodes.push(target);
                }
            }
        }
        Ok(nodes)
    }

    /// A project counts as multiplatform when a `multiplatform=true` marker
    /// exists at project or module level, or when it has more than one module
    /// dir and any of them is something other than `main:main` / `main:test`.
    pub fn is_multiplatform(&self, project: &str, variant: &PlatformModule) -> Result<bool> {
        let project_dir = self.layout.project_dir(project);
        let module_dir = self.layout.module_dir(&ModuleKey::new(project, variant.clone()));
        if self.store.is_true(&project_dir.join(MULTIPLATFORM_FILE))?
            || self.store.is_true(&module_dir.join(MULTIPLATFORM_FILE))?
        {
            return Ok(true);
        }

        let variants: Vec<String> = list_dir(&project_dir)?
            .into_iter()
            .filter(|(_, is_dir)| *is_dir)
            .map(|(name, _)| name)
            .collect();
        Ok(variants.len() > 1
            && variants
                .iter()
                .any(|name| name != "main:main" && name != "main:test"))
    }

    /// Drop every cached result.
    pub fn clear(&self) {
        self.entries.clear();
        self.coordinates.clear();
        self.live.clear();
    }

    /// `blake3` digest over every marker: sorted relative path plus content.
    pub fn fingerprint(&self) -> Result<String> {
        let root = self.layout.root();
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|err| io::Error::other(err.to_string()))?;
            if !entry.file_type().is_file() || entry.file_name().to_string_lossy().contains(".tmp.") {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            files.push((relative, entry.into_path()));
        }
        files.sort();

        let mut hasher = blake3::Hasher::new();
        for (relative, path) in files {
            hasher.update(relative.as_bytes());
            hasher.update(&[0]);
            hasher.update(&fs::read(&path)?);
            hasher.update(&[0]);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }
}

/// Sorted `(name, is_dir)` children of `dir`; empty when it does not exist.
fn list_dir(dir: &Path) -> Result<Vec<(String, bool)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut children = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.contains(".tmp.") {
            continue;
        }
        children.push((name, entry.file_type()?.is_dir()));
    }
    children.sort();
    Ok(children)
}

fn dir_name(path: Option<&Path>) -> String {
    path.and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `group:name:version` spelled by the last three components of a coordinate dir.
fn coordinate_of(layout: &IndexLayout, coord_dir: &Path) -> String {
    let relative = coord_dir
        .strip_prefix(layout.coord_root())
        .unwrap_or(coord_dir);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeRecorder;
    use crate::marker::DeterministicWrite;
    use crate::model::{Dependency, Module, Platform, Project};
    use crate::pattern::TemplateResolver;
    use crate::populate::{PopulateProject, Populator};
    use tempfile::TempDir;

    fn main_main() -> PlatformModule {
        PlatformModule::new("main", "main")
    }

    fn setup(index: &TempDir, projects: Vec<Project>) -> (IndexReader, Arc<MarkerStore>) {
        let graph = projects
            .into_iter()
            .fold(ProjectGraph::new("demo", "net.demo", "1.0", "/w"), |g, p| g.with_project(p));
        let graph = Arc::new(graph);
        let store = Arc::new(MarkerStore::new());
        let layout = IndexLayout::new(index.path());
        let resolver: Arc<dyn PatternResolver> = Arc::new(TemplateResolver::new());
        let populator = Populator::new(layout.clone(), store.clone(), resolver.clone(), graph.coordinates());
        for project in &graph.projects {
            populator.populate_project(project).unwrap();
        }
        (IndexReader::new(layout, store.clone(), resolver, graph), store)
    }

    fn app_with_deps() -> Project {
        Project::new(":app", "/nonexistent/app")
            .with_platform(Platform::new("main"))
            .with_module(Module::new("main"))
            .with_dependency(Dependency::project(main_main(), ":lib"))
            .with_dependency(Dependency::external(main_main(), "com.example", "widgets", "1.2.0"))
    }

    fn lib() -> Project {
        Project::new(":lib", "/nonexistent/lib")
            .with_platform(Platform::new("main"))
            .with_module(Module::new("main"))
    }

    #[test]
    fn test_get_entries_classifies_children() {
        let index = TempDir::new().unwrap();
        let (reader, _) = setup(&index, vec![app_with_deps(), lib()]);

        let entries = reader.get_entries(Some(":app"), &main_main()).unwrap();
        assert_eq!(entries.coordinate, "net.demo:app:1.0");
        assert_eq!(entries.external, vec!["com.example:widgets:1.2.0".to_string()]);
        assert_eq!(
            entries.projects,
            vec![ProjectEntry {
                project: ":lib".into(),
                target: "main:main".into()
            }]
        );
        assert!(entries.has_explicit_dependencies());
        assert!(entries.has_entries());
        assert!(!reader.has_entries(Some(":lib"), &main_main()).unwrap());
    }

    #[test]
    fn test_entries_are_cached_until_clear() {
        let index = TempDir::new().unwrap();
        let (reader, _) = setup(&index, vec![lib()]);
        let first = reader.get_entries(Some(":lib"), &main_main()).unwrap();
        assert!(!first.has_entries());

        let coord = reader.coordinate_dir(Some(":lib"), &main_main()).unwrap();
        fs::write(coord.join("org.x:y:2"), "org.x:y:2").unwrap();

        let cached = reader.get_entries(Some(":lib"), &main_main()).unwrap();
        assert!(Arc::ptr_eq(&first, &cached));

        reader.clear();
        let fresh = reader.get_entries(Some(":lib"), &main_main()).unwrap();
        assert_eq!(fresh.external, vec!["org.x:y:2".to_string()]);
    }

    #[test]
    fn test_resolve_and_dependency_exists() {
        let index = TempDir::new().unwrap();
        let (reader, _) = setup(&index, vec![app_with_deps(), lib()]);

        assert!(reader.dependency_exists("net.demo", "app", "1.0"));
        assert!(!reader.dependency_exists("net.demo", "nope", "1.0"));
        let resolved = reader.resolve("net.demo", "app", "1.0").unwrap().unwrap();
        assert_eq!(resolved.projects.len(), 1);
        assert!(reader.resolve("net.demo", "nope", "1.0").unwrap().is_none());
    }

    #[test]
    fn test_check_live() {
        let index = TempDir::new().unwrap();
        let (reader, store) = setup(&index, vec![]);
        let layout = reader.layout().clone();
        let edges = EdgeRecorder::new(layout.clone(), store.clone());
        let key = |p: &str| ModuleKey::new(p, main_main());

        // top (forced) -> mid -> base (sources); dangling -> base
        edges.record_edge(&key(":top"), &key(":mid")).unwrap();
        edges.record_edge(&key(":mid"), &key(":base")).unwrap();
        edges.record_edge(&key(":dangling"), &key(":base")).unwrap();
        let set = |p: &str, level: Liveness| {
            store
                .write_always(DeterministicWrite::level(layout.module_dir(&key(p)).join(LIVE_FILE), level))
                .unwrap();
        };
        set(":top", Liveness::Forced);
        set(":mid", Liveness::Reachable);
        set(":base", Liveness::HasSources);
        set(":dangling", Liveness::Reachable);

        assert!(reader.check_live(":base", &main_main()).unwrap());
        assert!(reader.check_live(":mid", &main_main()).unwrap());
        assert!(!reader.check_live(":dangling", &main_main()).unwrap());
        assert!(!reader.check_live(":nowhere", &main_main()).unwrap());
    }

    #[test]
    fn test_is_multiplatform() {
        let index = TempDir::new().unwrap();
        let plain = Project::new(":plain", "/nonexistent/plain")
            .with_platform(Platform::new("main"))
            .with_module(Module::new("main"))
            .with_module(Module::new("test"));
        let multi = Project::new(":multi", "/nonexistent/multi")
            .with_platform(Platform::new("main"))
            .with_platform(Platform::new("jre"))
            .with_module(Module::new("main"));
        let (reader, _) = setup(&index, vec![plain, multi]);

        assert!(!reader.is_multiplatform(":plain", &main_main()).unwrap());
        assert!(reader.is_multiplatform(":multi", &main_main()).unwrap());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let index = TempDir::new().unwrap();
        let (reader, _) = setup(&index, vec![app_with_deps(), lib()]);
        let before = reader.fingerprint().unwrap();
        assert_eq!(before, reader.fingerprint().unwrap());

        let live = index.path().join("path/_lib/main:main/live");
        fs::write(&live, "1").unwrap();
        assert_ne!(before, reader.fingerprint().unwrap());
    }
}
