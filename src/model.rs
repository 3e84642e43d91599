//! Project model - the immutable input to one indexing run
//!
//! A build is a set of projects. Each project exposes platforms and modules
//! (two independent variant axes) and declares dependencies per
//! `platform:module` pair:
//! - `Project`: another project in the same build (`:lib`)
//! - `Internal`: another `platform:module` of the same project
//! - `External`: a published `group:name:version` coordinate

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The platform / module pair naming one buildable unit inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlatformModule {
    pub platform: String,
    pub module: String,
}

impl PlatformModule {
    pub fn new(platform: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            module: module.into(),
        }
    }

    /// Parse `platform:module`, or a bare `module` which inherits `default_platform`.
    pub fn parse(value: &str, default_platform: &str) -> Result<Self> {
        let value = value.trim();
        let (platform, module) = match value.split_once(':') {
            Some((platform, module)) => (platform, module),
            None => (default_platform, value),
        };
        if platform.is_empty() || module.is_empty() || module.contains(':') {
            return Err(Error::Resolution(format!(
                "invalid platform:module reference '{}'",
                value
            )));
        }
        Ok(Self::new(platform, module))
    }

    /// Key form used for module directory names: `platform:module`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.platform, self.module)
    }

    /// Gradle-style source-set name: `main:api` -> `api`, `jre:main` -> `jre`,
    /// `jre:test` -> `jreTest`.
    pub fn source_set(&self) -> String {
        if self.platform == "main" {
            return self.module.clone();
        }
        if self.module == "main" {
            return self.platform.clone();
        }
        let mut chars = self.module.chars();
        match chars.next() {
            Some(first) => format!("{}{}{}", self.platform, first.to_uppercase(), chars.as_str()),
            None => self.platform.clone(),
        }
    }
}

impl fmt::Display for PlatformModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.module)
    }
}

fn default_true() -> bool {
    true
}

/// A platform variant axis (target environment: `main`, `jre`, `gwt`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub name: String,
    /// Template for the published group; `None` uses the configured default.
    #[serde(default)]
    pub publish_pattern: Option<String>,
    #[serde(default = "default_true")]
    pub published: bool,
}

impl Platform {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            publish_pattern: None,
            published: true,
        }
    }
}

/// A module variant axis (source role: `main`, `api`, `test`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    /// Template for the published artifact name; `None` uses the configured default.
    #[serde(default)]
    pub publish_pattern: Option<String>,
    #[serde(default = "default_true")]
    pub published: bool,
    #[serde(default)]
    pub test: bool,
    #[serde(default)]
    pub force: bool,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            publish_pattern: None,
            published: true,
            test: false,
            force: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn as_test(mut self) -> Self {
        self.test = true;
        self
    }
}

/// How a dependency target is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Another project of this build, by project path
    Project,
    /// Another platform:module of the declaring project
    Internal,
    /// A published `group:name:version` artifact
    External,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Project => "project",
            DependencyKind::Internal => "internal",
            DependencyKind::External => "external",
        }
    }
}

impl FromStr for DependencyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "project" | "unknown" => Ok(DependencyKind::Project),
            "internal" => Ok(DependencyKind::Internal),
            "external" => Ok(DependencyKind::External),
            _ => Err(Error::Resolution(format!("Unknown dependency kind: {}", s))),
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One dependency edge declared by a project's `platform:module` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub kind: DependencyKind,
    /// The declaring pair inside the owning project
    pub from: PlatformModule,
    /// Project path (`Project`), `platform:module` (`Internal`) or artifact name (`External`)
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Extra qualifier appended to an external coordinate (classifier etc.)
    #[serde(default)]
    pub extra: Option<String>,
    /// Explicit target platform; falls back to the declaring platform
    #[serde(default)]
    pub platform: Option<String>,
    /// Explicit target module; falls back to the declaring module
    #[serde(default)]
    pub module: Option<String>,
}

impl Dependency {
    pub fn project(from: PlatformModule, path: impl Into<String>) -> Self {
        Self::new(DependencyKind::Project, from, path)
    }

    pub fn internal(from: PlatformModule, target: impl Into<String>) -> Self {
        Self::new(DependencyKind::Internal, from, target)
    }

    pub fn external(
        from: PlatformModule,
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let mut dep = Self::new(DependencyKind::External, from, name);
        dep.group = Some(group.into());
        dep.version = Some(version.into());
        dep
    }

    fn new(kind: DependencyKind, from: PlatformModule, name: impl Into<String>) -> Self {
        Self {
            kind,
            from,
            name: name.into(),
            group: None,
            version: None,
            extra: None,
            platform: None,
            module: None,
        }
    }

    pub fn with_target(mut self, platform: Option<&str>, module: Option<&str>) -> Self {
        self.platform = platform.map(str::to_string);
        self.module = module.map(str::to_string);
        self
    }

    /// The target pair: explicit overrides first, then the requestor's own pair.
    pub fn effective_target(&self, requestor: &PlatformModule) -> PlatformModule {
        PlatformModule::new(
            self.platform.as_deref().unwrap_or(&requestor.platform),
            self.module.as_deref().unwrap_or(&requestor.module),
        )
    }

    /// `group:name:version[:extra]` for external dependencies.
    pub fn literal_coordinate(&self) -> Result<String> {
        let group = required(self.group.as_deref(), "group", self)?;
        let version = required(self.version.as_deref(), "version", self)?;
        let name = required(Some(&self.name), "name", self)?;
        Ok(match self.extra.as_deref().map(str::trim) {
            Some(extra) if !extra.is_empty() => format!("{}:{}:{}:{}", group, name, version, extra),
            _ => format!("{}:{}:{}", group, name, version),
        })
    }
}

fn required<'a>(value: Option<&'a str>, attribute: &str, dep: &Dependency) -> Result<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Resolution(format!(
            "{} dependency '{}' declared by {} is missing required attribute '{}'",
            dep.kind, dep.name, dep.from, attribute
        ))),
    }
}

/// Last segment of a project path; the root project `:` takes the build name.
pub fn default_project_name(path: &str, build_name: &str) -> String {
    match path.rsplit(':').find(|segment| !segment.is_empty()) {
        Some(segment) => segment.to_string(),
        None => build_name.to_string(),
    }
}

/// A build unit: a project path plus its variants and dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Gradle-style project path, `:` for the root project
    pub path: String,
    /// Published project name; defaults to the last path segment
    #[serde(default)]
    pub name: Option<String>,
    /// Project directory on disk, scanned for `src/<source-set>` directories
    pub dir: PathBuf,
    #[serde(default)]
    pub platforms: Vec<Platform>,
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub multiplatform: bool,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

impl Project {
    pub fn new(path: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
            dir: dir.into(),
            platforms: Vec::new(),
            modules: Vec::new(),
            dependencies: Vec::new(),
            multiplatform: false,
            is_virtual: false,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platforms.push(platform);
        self
    }

    pub fn with_module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Name used in publish patterns (`$name`).
    pub fn published_name(&self, build_name: &str) -> String {
        match self.name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => default_project_name(&self.path, build_name),
        }
    }

    pub fn dependencies_of<'a>(
        &'a self,
        platform: &'a str,
        module: &'a str,
    ) -> impl Iterator<Item = &'a Dependency> + 'a {
        self.dependencies
            .iter()
            .filter(move |d| d.from.platform == platform && d.from.module == module)
    }

    /// Every platform x module pair, published or not.
    pub fn variants(&self) -> impl Iterator<Item = (&Platform, &Module)> + '_ {
        self.platforms
            .iter()
            .flat_map(move |p| self.modules.iter().map(move |m| (p, m)))
    }
}

/// Identity of the build being indexed: name plus published group and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCoordinates {
    pub build_name: String,
    pub group: String,
    pub version: String,
}

impl BuildCoordinates {
    pub fn new(
        build_name: impl Into<String>,
        group: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            build_name: build_name.into(),
            group: group.into(),
            version: version.into(),
        }
    }
}

/// The whole build handed to the indexer for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectGraph {
    pub build_name: String,
    pub group: String,
    pub version: String,
    /// Root project directory; the default index lives under `build/xindex`
    pub root_dir: PathBuf,
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl ProjectGraph {
    pub fn new(
        build_name: impl Into<String>,
        group: impl Into<String>,
        version: impl Into<String>,
        root_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            build_name: build_name.into(),
            group: group.into(),
            version: version.into(),
            root_dir: root_dir.into(),
            projects: Vec::new(),
        }
    }

    pub fn with_project(mut self, project: Project) -> Self {
        self.projects.push(project);
        self
    }

    pub fn coordinates(&self) -> BuildCoordinates {
        BuildCoordinates::new(&self.build_name, &self.group, &self.version)
    }

    pub fn project(&self, path: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.path == path)
    }

    /// Load a graph description from a `.json` or `.toml` file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(toml::from_str(&contents)?)
        }
    }
}
