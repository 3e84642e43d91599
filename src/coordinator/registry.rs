//! Run registry - which build identities are being (or have been) indexed
//!
//! Injected into the [`super::Coordinator`] instead of living in process-global
//! state, so independent registries never see each other's runs.

use super::IndexHandle;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Terminal and in-flight states of one indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl RunState {
    /// Sentinel string other build components read for this run.
    pub fn property_value(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Succeeded => "done",
            RunState::Failed | RunState::TimedOut => "failed",
        }
    }

    /// Whether a new `index` call should join this run instead of starting over.
    pub fn is_reusable(&self) -> bool {
        matches!(self, RunState::Running | RunState::Succeeded)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::TimedOut => "timed out",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of [`RunRegistry::begin`].
#[derive(Debug)]
pub enum Begin {
    /// A run for this identity is in flight or already succeeded
    Existing(IndexHandle),
    /// The caller owns a fresh run and must eventually [`RunRegistry::finish`] it
    Started(IndexHandle),
}

#[derive(Debug)]
struct RunEntry {
    state: RunState,
    handle: IndexHandle,
}

#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, RunEntry>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the existing run for `id`, or register a new running one.
    /// Failed and timed-out runs are replaced.
    pub fn begin(&self, id: &str) -> Begin {
        let mut runs = self.runs();
        if let Some(entry) = runs.get(id) {
            if entry.state.is_reusable() {
                return Begin::Existing(entry.handle.clone());
            }
        }
        let handle = IndexHandle::new(id);
        runs.insert(
            id.to_string(),
            RunEntry {
                state: RunState::Running,
                handle: handle.clone(),
            },
        );
        Begin::Started(handle)
    }

    /// Record the terminal state of a run; returns the state it replaced.
    pub fn finish(&self, id: &str, state: RunState) -> Option<RunState> {
        let mut runs = self.runs();
        let entry = runs.get_mut(id)?;
        Some(std::mem::replace(&mut entry.state, state))
    }

    pub fn state(&self, id: &str) -> Option<RunState> {
        self.runs().get(id).map(|entry| entry.state)
    }

    /// `running`, `done`, `failed`, or `None` when the identity was never indexed.
    pub fn property(&self, id: &str) -> Option<&'static str> {
        self.state(id).map(|state| state.property_value())
    }

    pub fn handle(&self, id: &str) -> Option<IndexHandle> {
        self.runs().get(id).map(|entry| entry.handle.clone())
    }

    /// Drop everything known about `id`, so the next `begin` starts fresh.
    pub fn forget(&self, id: &str) -> Option<RunState> {
        self.runs().remove(id).map(|entry| entry.state)
    }
}
