//! Read side of the index.

pub mod reader;

pub use reader::{IndexReader, IndexResult, ProjectEntry};

use crate::model::{BuildCoordinates, PlatformModule};
use crate::populate::PopulateStats;
use crate::propagate::PropagationStats;
use crate::Result;
use std::sync::Arc;

/// Immutable summary of one finished indexing run, shared by every caller of
/// the run's handle.
pub struct SchemaIndex {
    pub coordinates: BuildCoordinates,
    pub populated: PopulateStats,
    pub propagation: PropagationStats,
    reader: Arc<IndexReader>,
}

impl SchemaIndex {
    pub fn new(
        coordinates: BuildCoordinates,
        populated: PopulateStats,
        propagation: PropagationStats,
        reader: Arc<IndexReader>,
    ) -> Self {
        Self {
            coordinates,
            populated,
            propagation,
            reader,
        }
    }

    pub fn build_name(&self) -> &str {
        &self.coordinates.build_name
    }

    pub fn group(&self) -> &str {
        &self.coordinates.group
    }

    pub fn version(&self) -> &str {
        &self.coordinates.version
    }

    pub fn reader(&self) -> &Arc<IndexReader> {
        &self.reader
    }

    pub fn get_entries(&self, project: Option<&str>, variant: &PlatformModule) -> Result<Arc<IndexResult>> {
        self.reader.get_entries(project, variant)
    }

    pub fn has_entries(&self, project: Option<&str>, variant: &PlatformModule) -> Result<bool> {
        self.reader.has_entries(project, variant)
    }

    pub fn resolve(&self, group: &str, name: &str, version: &str) -> Result<Option<Arc<IndexResult>>> {
        self.reader.resolve(group, name, version)
    }
}

impl std::fmt::Debug for SchemaIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaIndex")
            .field("coordinates", &self.coordinates)
            .field("index_dir", &self.reader.layout().root())
            .field("populated", &self.populated)
            .finish()
    }
}
