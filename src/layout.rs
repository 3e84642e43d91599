//! Index layout - where every fact lives on disk
//!
//! ```text
//! <root>/path/<mangled-project>/<platform:module>/   module dir
//!            live, sources, test, publish, force, multiplatform, virtual
//!            in/<mangled-project>/<platform:module>/link
//!            out/<mangled-project>/<platform:module>/link
//! <root>/coord/<group>/<name>/<version>/             coordinate dir
//! ```
//!
//! All functions here are pure and total. Names are escaped so that distinct
//! inputs never share a directory: `%` `/` `\` and control characters become
//! `%XX`; in project paths `_` is escaped and `:` becomes `_`, so `:app:core`
//! mangles to `_app_core`.

use crate::model::PlatformModule;
use std::fmt;
use std::path::{Path, PathBuf};

pub const PATH_DIR: &str = "path";
pub const COORD_DIR: &str = "coord";
pub const IN_DIR: &str = "in";
pub const OUT_DIR: &str = "out";
pub const LINK_FILE: &str = "link";

/// Identity of one module unit: project path plus `platform:module`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey {
    pub project: String,
    pub variant: PlatformModule,
}

impl ModuleKey {
    pub fn new(project: impl Into<String>, variant: PlatformModule) -> Self {
        Self {
            project: project.into(),
            variant,
        }
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.project, self.variant)
    }
}

/// Direction of an edge entry relative to the module dir that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    /// `in/`: modules this one requires
    Requires,
    /// `out/`: modules that require this one
    RequiredBy,
}

impl EdgeDirection {
    pub fn dir_name(&self) -> &'static str {
        match self {
            EdgeDirection::Requires => IN_DIR,
            EdgeDirection::RequiredBy => OUT_DIR,
        }
    }
}

fn push_escaped(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    for byte in c.encode_utf8(&mut buf).bytes() {
        out.push_str(&format!("%{:02X}", byte));
    }
}

fn finish_segment(out: String) -> String {
    match out.as_str() {
        "" => "%".to_string(),
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => out,
    }
}

/// Escape one directory name component.
pub fn escape_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' | '/' | '\\' | ':' => push_escaped(&mut out, c),
            c if c.is_control() => push_escaped(&mut out, c),
            c => out.push(c),
        }
    }
    finish_segment(out)
}

/// File name for a literal coordinate entry: `:` is kept so the name reads as
/// `group:name:version`.
pub fn literal_entry_name(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        match c {
            '%' | '/' | '\\' => push_escaped(&mut out, c),
            c if c.is_control() => push_escaped(&mut out, c),
            c => out.push(c),
        }
    }
    finish_segment(out)
}

/// Directory-safe form of a project path: `:` -> `_`, literal `_` -> `%5F`.
pub fn mangle_project_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for c in path.chars() {
        match c {
            ':' => out.push('_'),
            '_' | '%' | '/' | '\\' => push_escaped(&mut out, c),
            c if c.is_control() => push_escaped(&mut out, c),
            c => out.push(c),
        }
    }
    finish_segment(out)
}

/// Inverse of [`mangle_project_path`], used for diagnostics.
pub fn demangle_project_path(mangled: &str) -> String {
    if mangled == "%" {
        return String::new();
    }
    let mut bytes = Vec::with_capacity(mangled.len());
    let raw = mangled.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'_' => {
                bytes.push(b':');
                i += 1;
            }
            b'%' if i + 2 < raw.len() => {
                let hex = std::str::from_utf8(&raw[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        bytes.push(byte);
                        i += 3;
                    }
                    None => {
                        bytes.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                bytes.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Directory name of a module unit: `<platform>:<module>`.
pub fn module_dir_name(variant: &PlatformModule) -> String {
    format!(
        "{}:{}",
        escape_segment(&variant.platform),
        escape_segment(&variant.module)
    )
}

/// Pure path calculations rooted at one index directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLayout {
    root: PathBuf,
}

impl IndexLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/path`
    pub fn path_root(&self) -> PathBuf {
        self.root.join(PATH_DIR)
    }

    /// `<root>/coord`
    pub fn coord_root(&self) -> PathBuf {
        self.root.join(COORD_DIR)
    }

    /// Directory holding every module dir of one project.
    pub fn project_dir(&self, project_path: &str) -> PathBuf {
        self.path_root().join(mangle_project_path(project_path))
    }

    pub fn module_dir(&self, key: &ModuleKey) -> PathBuf {
        self.project_dir(&key.project)
            .join(module_dir_name(&key.variant))
    }

    pub fn coord_dir(&self, group: &str, name: &str, version: &str) -> PathBuf {
        self.coord_root()
            .join(escape_segment(group))
            .join(escape_segment(name))
            .join(escape_segment(version))
    }

    /// `<owner module dir>/<in|out>/<mangled other>/<other platform:module>`
    pub fn edge_dir(&self, owner: &ModuleKey, direction: EdgeDirection, other: &ModuleKey) -> PathBuf {
        self.module_dir(owner)
            .join(direction.dir_name())
            .join(mangle_project_path(&other.project))
            .join(module_dir_name(&other.variant))
    }

    /// Content of a `link` file: path to `target`'s module dir, relative to the
    /// module dir owning the link.
    pub fn link_value(&self, target: &ModuleKey) -> String {
        format!(
            "../../{}/{}",
            mangle_project_path(&target.project),
            module_dir_name(&target.variant)
        )
    }

    /// Pointer from a coordinate dir back to its module dir, relative to the index root.
    pub fn module_pointer(&self, key: &ModuleKey) -> String {
        format!(
            "{}/{}/{}",
            PATH_DIR,
            mangle_project_path(&key.project),
            module_dir_name(&key.variant)
        )
    }
}

/// A module dir named by its two directory components under `path/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleNode {
    pub project_dir: String,
    pub module_dir: String,
}

impl ModuleNode {
    pub fn dir(&self, layout: &IndexLayout) -> PathBuf {
        layout
            .path_root()
            .join(&self.project_dir)
            .join(&self.module_dir)
    }

    /// Parse a `link` value written by [`IndexLayout::link_value`].
    pub fn from_link(link: &str) -> Option<Self> {
        let rest = link.trim().strip_prefix("../../")?;
        let (project_dir, module_dir) = rest.split_once('/')?;
        if project_dir.is_empty() || module_dir.is_empty() || module_dir.contains('/') {
            return None;
        }
        Some(Self {
            project_dir: project_dir.to_string(),
            module_dir: module_dir.to_string(),
        })
    }
}

impl fmt::Display for ModuleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_dir, self.module_dir)
    }
}
