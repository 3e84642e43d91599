//! Index populator - writes one project's facts into the index
//!
//! For every published `platform:module` pair of a project:
//! - the pair's coordinate dir under `coord/<group>/<name>/<version>/` gets one
//!   entry per declared dependency
//! - project and internal dependencies become graph edges via [`EdgeRecorder`]
//! - external coordinates are leaves: a literal marker, no edge
//! - the module dir records `sources`, `test`, `publish`, `force` and a `live`
//!   marker (forced modules start at level 3)
//!
//! Population of different projects runs in parallel; see [`crate::marker`] for
//! why that needs no locking.

use crate::edge::EdgeRecorder;
use crate::layout::{IndexLayout, ModuleKey, literal_entry_name, mangle_project_path, module_dir_name};
use crate::marker::{
    DeterministicWrite, FORCE_FILE, LIVE_FILE, Liveness, MarkerStore,
    PUBLISH_FILE, SOURCES_FILE, TEST_FILE,
};
use crate::model::{BuildCoordinates, Dependency, DependencyKind, Module, Platform, PlatformModule, Project};
use crate::pattern::{PatternContext, PatternResolver};
use crate::{Error, Result};
use std::fmt;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Coordinate-dir child holding project dependency pointers.
pub const PROJECT_ENTRY_DIR: &str = "project";
/// Coordinate-dir child holding internal `platform:module` entries.
pub const INTERNAL_ENTRY_DIR: &str = "internal";

/// What one project contributed to the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulateStats {
    pub modules: usize,
    pub edges: usize,
    pub externals: usize,
}

impl AddAssign for PopulateStats {
    fn add_assign(&mut self, other: Self) {
        self.modules += other.modules;
        self.edges += other.edges;
        self.externals += other.externals;
    }
}

impl fmt::Display for PopulateStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} modules, {} edges, {} external coordinates",
            self.modules, self.edges, self.externals
        )
    }
}

/// One unit of population work, run once per project on a pool thread.
pub trait PopulateProject: Send + Sync {
    fn populate_project(&self, project: &Project) -> Result<PopulateStats>;
}

/// Default populator writing into an [`IndexLayout`].
pub struct Populator {
    layout: IndexLayout,
    store: Arc<MarkerStore>,
    edges: EdgeRecorder,
    resolver: Arc<dyn PatternResolver>,
    coords: BuildCoordinates,
}

impl Populator {
    pub fn new(
        layout: IndexLayout,
        store: Arc<MarkerStore>,
        resolver: Arc<dyn PatternResolver>,
        coords: BuildCoordinates,
    ) -> Self {
        let edges = EdgeRecorder::new(layout.clone(), store.clone());
        Self {
            layout,
            store,
            edges,
            resolver,
            coords,
        }
    }

    /// Coordinate dir of one published pair.
    pub fn coordinate_dir(&self, project: &Project, platform: &Platform, module: &Module) -> Result<PathBuf> {
        let project_name = project.published_name(&self.coords.build_name);
        let ctx = PatternContext {
            build_name: &self.coords.build_name,
            project_name: &project_name,
            group: &self.coords.group,
            version: &self.coords.version,
            platform: &platform.name,
            module: &module.name,
        };
        let group = self
            .resolver
            .resolve_group(platform.publish_pattern.as_deref(), &ctx)?;
        let name = self
            .resolver
            .resolve_name(module.publish_pattern.as_deref(), &ctx)?;
        Ok(self.layout.coord_dir(&group, &name, &self.coords.version))
    }

    fn populate_variant(
        &self,
        project: &Project,
        platform: &Platform,
        module: &Module,
        stats: &mut PopulateStats,
    ) -> Result<()> {
        let pair = PlatformModule::new(&platform.name, &module.name);
        let key = ModuleKey::new(&project.path, pair.clone());
        let module_dir = self.layout.module_dir(&key);
        let coord_dir = self.coordinate_dir(project, platform, module)?;
        self.store.ensure_dir(&coord_dir)?;

        if let Some(src) = has_sources(&project.dir, &pair) {
            let src = src.to_string_lossy();
            self.store
                .write_always(DeterministicWrite::new(module_dir.join(SOURCES_FILE), src))?;
            self.store.write_always(DeterministicWrite::new(
                coord_dir.join(SOURCES_FILE),
                self.layout.module_pointer(&key),
            ))?;
        }

        for dependency in project.dependencies_of(&platform.name, &module.name) {
            match dependency.kind {
                DependencyKind::Project => {
                    let target = dependency.effective_target(&pair);
                    let requested = ModuleKey::new(dependency.name.trim(), target.clone());
                    if requested.project.is_empty() {
                        return Err(Error::Resolution(format!(
                            "project dependency declared by {} has no project path",
                            key
                        )));
                    }
                    self.store.write_always(DeterministicWrite::new(
                        coord_dir
                            .join(PROJECT_ENTRY_DIR)
                            .join(mangle_project_path(&requested.project)),
                        target.key(),
                    ))?;
                    self.edges.record_edge(&key, &requested)?;
                    stats.edges += 1;
                }
                DependencyKind::Internal => {
                    let target = internal_target(dependency, &pair)?;
                    self.store.touch(
                        &coord_dir
                            .join(INTERNAL_ENTRY_DIR)
                            .join(module_dir_name(&target)),
                    )?;
                    let requested = ModuleKey::new(&project.path, target);
                    self.edges.record_edge(&key, &requested)?;
                    stats.edges += 1;
                }
                DependencyKind::External => {
                    let literal = dependency.literal_coordinate()?;
                    self.store.write_always(DeterministicWrite::new(
                        coord_dir.join(literal_entry_name(&literal)),
                        literal.as_str(),
                    ))?;
                    stats.externals += 1;
                }
            }
        }

        self.store
            .write_flag(&module_dir.join(TEST_FILE), module.test)?;
        self.store
            .write_flag(&module_dir.join(PUBLISH_FILE), true)?;
        self.store
            .write_flag(&module_dir.join(FORCE_FILE), module.force)?;

        let live = module_dir.join(LIVE_FILE);
        if module.force {
            self.store.raise_level(&live, Liveness::Forced)?;
        } else {
            self.store
                .write_if_absent(DeterministicWrite::level(&live, Liveness::Dead))?;
        }

        stats.modules += 1;
        Ok(())
    }
}

impl PopulateProject for Populator {
    fn populate_project(&self, project: &Project) -> Result<PopulateStats> {
        let mut stats = PopulateStats::default();
        for (platform, module) in project.variants() {
            if !platform.published || !module.published {
                tracing::trace!(project = %project.path, platform = %platform.name, module = %module.name, "skipping unpublished variant");
                continue;
            }
            self.populate_variant(project, platform, module, &mut stats)
                .map_err(|err| in_context(err, project, platform, module))?;
        }

        tracing::debug!(project = %project.path, %stats, "populated project");
        Ok(stats)
    }
}

/// Target of an internal dependency. The dependency name is `platform:module`
/// or a bare module name on the declaring (or explicitly given) platform.
fn internal_target(dependency: &Dependency, requestor: &PlatformModule) -> Result<PlatformModule> {
    let name = dependency.name.trim();
    if name.is_empty() {
        return Ok(dependency.effective_target(requestor));
    }
    let platform = dependency.platform.as_deref().unwrap_or(&requestor.platform);
    PlatformModule::parse(name, platform)
}

fn in_context(err: Error, project: &Project, platform: &Platform, module: &Module) -> Error {
    match err {
        Error::Resolution(message) => Error::Resolution(format!(
            "{}@{}:{}: {}",
            project.path, platform.name, module.name, message
        )),
        other => other,
    }
}

/// Source directory of a `platform:module` pair, when it holds any sources.
///
/// `src/<source-set>` counts when it contains a sub-directory other than
/// `build`; `src/gradle/<source-set>` counts when it is non-empty.
pub fn has_sources(project_dir: &Path, pair: &PlatformModule) -> Option<PathBuf> {
    let source_set = pair.source_set();
    let src = project_dir.join("src").join(&source_set);
    if let Ok(entries) = std::fs::read_dir(&src) {
        let has_dir = entries.flatten().any(|entry| {
            entry.file_type().is_ok_and(|t| t.is_dir()) && entry.file_name() != "build"
        });
        if has_dir {
            return Some(src);
        }
    }

    let gradle = project_dir.join("src").join("gradle").join(&source_set);
    match std::fs::read_dir(&gradle) {
        Ok(mut entries) => entries.next().is_some().then_some(gradle),
        Err(_) => None,
    }
}
