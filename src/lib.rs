//! # xindex - Dependency-graph indexer for multi-project builds
//!
//! Turns an in-memory model of projects, their `platform:module` variants and
//! dependency edges into a durable on-disk index that build tasks can query
//! without re-walking the project graph.
//!
//! xindex provides:
//! - Deterministic directory layout keyed by project path and `group:name:version`
//! - Symmetric `in`/`out` edge links between module directories
//! - Liveness propagation from modules with sources to everything that requires them
//! - Parallel population with a bounded worker pool and a timeout barrier
//! - A cached query surface over the finished index

pub mod config;
pub mod coordinator;
pub mod edge;
pub mod layout;
pub mod marker;
pub mod model;
pub mod pattern;
pub mod populate;
pub mod propagate;
pub mod query;
pub mod ui;

// Re-exports for convenient access
pub use config::{IndexerConfig, Settings};
pub use coordinator::{Coordinator, IndexHandle, RunRegistry, RunState};
pub use edge::EdgeRecorder;
pub use layout::{IndexLayout, ModuleKey};
pub use marker::{DeterministicWrite, Liveness, MarkerStore};
pub use model::{
    BuildCoordinates, Dependency, DependencyKind, Module, Platform, PlatformModule, Project,
    ProjectGraph,
};
pub use pattern::{PatternContext, PatternResolver, TemplateResolver};
pub use populate::{PopulateProject, PopulateStats, Populator};
pub use propagate::{LivenessPropagator, PropagationStats};
pub use query::{IndexReader, IndexResult, SchemaIndex};

use std::path::PathBuf;

/// Result type alias for xindex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for xindex operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Link divergence in {}: existing '{existing}', computed '{computed}'", link.display())]
    LinkDivergence {
        link: PathBuf,
        existing: String,
        computed: String,
    },

    #[error("Took more than {millis} millis to build index for {build} ({outstanding} task(s) still running)")]
    Timeout {
        build: String,
        millis: u64,
        outstanding: usize,
    },

    #[error("{message} ({} failures):{}", causes.len(), format_causes(causes))]
    Aggregate { message: String, causes: Vec<Error> },

    #[error("{message}: {source}")]
    IndexFailed {
        message: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Indexing task panicked: {0}")]
    TaskPanicked(String),

    #[error("Invalid marker {}: '{content}'", path.display())]
    InvalidMarker { path: PathBuf, content: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_causes(causes: &[Error]) -> String {
    causes
        .iter()
        .enumerate()
        .map(|(i, cause)| format!("\n  {}. {}", i + 1, cause))
        .collect()
}

impl Error {
    /// All root causes: the wrapped list for `Aggregate`, otherwise just `self`.
    pub fn causes(&self) -> Vec<&Error> {
        match self {
            Error::Aggregate { causes, .. } => causes.iter().collect(),
            Error::IndexFailed { source, .. } => vec![source.as_ref()],
            other => vec![other],
        }
    }
}
