//! Edge recorder - symmetric `in`/`out` links between module dirs
//!
//! For a dependency `requestor -> requested`:
//! - `<requestor>/in/<requested ppm>/link` points at the requested module dir
//! - `<requested>/out/<requestor ppm>/link` points back at the requestor
//!
//! Both halves are always written together, and both endpoints get a `live`
//! marker (default `0`) so the propagator sees every node of the graph.

use crate::layout::{EdgeDirection, IndexLayout, LINK_FILE, ModuleKey};
use crate::marker::{DeterministicWrite, LIVE_FILE, Liveness, MarkerStore};
use crate::{Error, Result};
use std::path::Path;
use std::sync::Arc;

/// Writes dependency edges into the index.
#[derive(Debug, Clone)]
pub struct EdgeRecorder {
    layout: IndexLayout,
    store: Arc<MarkerStore>,
}

impl EdgeRecorder {
    pub fn new(layout: IndexLayout, store: Arc<MarkerStore>) -> Self {
        Self { layout, store }
    }

    /// Record `requestor -> requested`. Idempotent; a link that already exists
    /// with different content is a [`Error::LinkDivergence`].
    pub fn record_edge(&self, requestor: &ModuleKey, requested: &ModuleKey) -> Result<()> {
        let requestor_dir = self.layout.module_dir(requestor);
        let requested_dir = self.layout.module_dir(requested);

        // every node of the graph carries a live marker before propagation
        self.store.write_if_absent(DeterministicWrite::level(
            requestor_dir.join(LIVE_FILE),
            Liveness::Dead,
        ))?;
        self.store.write_if_absent(DeterministicWrite::level(
            requested_dir.join(LIVE_FILE),
            Liveness::Dead,
        ))?;

        let in_link = self
            .layout
            .edge_dir(requestor, EdgeDirection::Requires, requested)
            .join(LINK_FILE);
        let out_link = self
            .layout
            .edge_dir(requested, EdgeDirection::RequiredBy, requestor)
            .join(LINK_FILE);

        self.write_link(&in_link, &self.layout.link_value(requested))?;
        self.write_link(&out_link, &self.layout.link_value(requestor))?;

        tracing::trace!(from = %requestor, to = %requested, "recorded edge");
        Ok(())
    }

    fn write_link(&self, link: &Path, computed: &str) -> Result<()> {
        if self.store.write_if_absent(DeterministicWrite::new(link, computed))? {
            return Ok(());
        }
        match self.store.read(link)? {
            Some(existing) if existing == computed => Ok(()),
            // created by a writer that has not flushed its content yet
            Some(existing) if existing.is_empty() => self
                .store
                .write_always(DeterministicWrite::new(link, computed)),
            Some(existing) => Err(Error::LinkDivergence {
                link: link.to_path_buf(),
                existing,
                computed: computed.to_string(),
            }),
            None => self
                .store
                .write_always(DeterministicWrite::new(link, computed)),
        }
    }
}
