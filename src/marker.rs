//! Marker store - small files that each hold one fact
//!
//! Every marker's content is a pure function of the project graph, never of
//! write order. Two tasks writing the same path therefore write the same bytes,
//! which is why no cross-task locking exists here: last writer wins and the
//! result is identical. [`DeterministicWrite`] names that contract at each call
//! site. Writing different content to one path from two tasks is a bug in the
//! caller.

use crate::{Error, Result};
use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

pub const LIVE_FILE: &str = "live";
pub const SOURCES_FILE: &str = "sources";
pub const TEST_FILE: &str = "test";
pub const PUBLISH_FILE: &str = "publish";
pub const FORCE_FILE: &str = "force";
pub const MULTIPLATFORM_FILE: &str = "multiplatform";
pub const VIRTUAL_FILE: &str = "virtual";

/// How strongly a module unit is considered used.
///
/// Levels only ever rise during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize)]
#[serde(into = "u8")]
pub enum Liveness {
    #[default]
    Dead = 0,
    /// Something live requires this module
    Reachable = 1,
    /// The module has its own sources
    HasSources = 2,
    /// The module is declared `force`
    Forced = 3,
    /// Explicitly included through a `live_*` property
    Explicit = 4,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liveness::Dead => "0",
            Liveness::Reachable => "1",
            Liveness::HasSources => "2",
            Liveness::Forced => "3",
            Liveness::Explicit => "4",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "" | "0" => Some(Liveness::Dead),
            "1" => Some(Liveness::Reachable),
            "2" => Some(Liveness::HasSources),
            "3" => Some(Liveness::Forced),
            "4" => Some(Liveness::Explicit),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        *self != Liveness::Dead
    }
}

impl From<Liveness> for u8 {
    fn from(level: Liveness) -> u8 {
        level as u8
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A marker write whose content is derived only from the project graph.
#[derive(Debug, Clone)]
pub struct DeterministicWrite<'a> {
    path: Cow<'a, Path>,
    content: Cow<'a, str>,
}

impl<'a> DeterministicWrite<'a> {
    pub fn new(path: impl Into<Cow<'a, Path>>, content: impl Into<Cow<'a, str>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn flag(path: impl Into<Cow<'a, Path>>, value: bool) -> Self {
        Self::new(path, if value { "true" } else { "false" })
    }

    pub fn level(path: impl Into<Cow<'a, Path>>, level: Liveness) -> Self {
        Self::new(path, level.as_str())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Filesystem access for marker files.
#[derive(Debug, Default)]
pub struct MarkerStore {
    writes: AtomicUsize,
}

impl MarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of marker files created or replaced through this store.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn ensure_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        Ok(())
    }

    /// Create the marker only if nothing exists at its path yet.
    ///
    /// Returns `true` when this call created the file.
    pub fn write_if_absent(&self, write: DeterministicWrite<'_>) -> Result<bool> {
        let path = write.path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        file.write_all(write.content().as_bytes())?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(path = %path.display(), content = write.content(), "created marker");
        Ok(true)
    }

    /// Replace the marker with new content (temp file + rename, so readers
    /// never observe a half-written value). Unchanged content is left alone.
    pub fn write_always(&self, write: DeterministicWrite<'_>) -> Result<()> {
        let path = write.path();
        if self.read(path)?.as_deref() == Some(write.content()) {
            return Ok(());
        }
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;
        let written = file
            .write_all(write.content().as_bytes())
            .and_then(|_| file.sync_all());
        drop(file);
        if let Err(err) = written.and_then(|_| fs::rename(&tmp_path, path)) {
            if let Err(remove_err) = fs::remove_file(&tmp_path) {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    tracing::debug!(
                        path = %tmp_path.display(),
                        error = %remove_err,
                        "failed to remove temporary marker file"
                    );
                }
            }
            return Err(err.into());
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(path = %path.display(), content = write.content(), "wrote marker");
        Ok(())
    }

    /// Trimmed marker content, `None` when the file does not exist.
    pub fn read(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Marker content, or `default` when missing or still empty.
    pub fn read_or_default(&self, path: &Path, default: &str) -> Result<String> {
        Ok(self
            .read(path)?
            .filter(|content| !content.is_empty())
            .unwrap_or_else(|| default.to_string()))
    }

    /// Create an empty marker, or bump the mtime of an existing one.
    pub fn touch(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.set_modified(SystemTime::now())?;
        Ok(())
    }

    pub fn is_true(&self, path: &Path) -> Result<bool> {
        Ok(self.read(path)?.as_deref() == Some("true"))
    }

    /// Boolean fact marker. A `false` is only written over an existing marker,
    /// so a module that never had the fact carries no file for it.
    pub fn write_flag(&self, path: &Path, value: bool) -> Result<()> {
        if value || path.exists() {
            self.write_always(DeterministicWrite::flag(path, value))?;
        }
        Ok(())
    }

    pub fn read_level(&self, path: &Path) -> Result<Liveness> {
        let content = self.read_or_default(path, Liveness::Dead.as_str())?;
        Liveness::parse(&content).ok_or_else(|| Error::InvalidMarker {
            path: path.to_path_buf(),
            content,
        })
    }

    /// Raise a `live` marker to at least `level`. Returns `true` when it changed.
    pub fn raise_level(&self, path: &Path, level: Liveness) -> Result<bool> {
        if self.read_level(path)? >= level {
            return Ok(false);
        }
        self.write_always(DeterministicWrite::level(path, level))?;
        Ok(true)
    }
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("marker path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}
