//! Fixed-size worker pool and the outstanding-task tracker
//!
//! Workers pull boxed jobs from a shared `crossbeam` channel. A job never
//! unwinds into its worker: panics are caught and recorded as
//! [`Error::TaskPanicked`], so the tracker always hears about every task.

use crate::{Error, Result};
use crossbeam::channel::{self, Receiver, Sender};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Longest single wait of the barrier before it re-checks the deadline.
pub const MAX_WAIT_SLICE: Duration = Duration::from_millis(500);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Identity of one submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: u64,
    pub label: String,
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.label)
    }
}

/// A task that has finished, successfully or not.
#[derive(Debug)]
pub struct Finished<T> {
    pub handle: TaskHandle,
    pub result: Result<T>,
}

/// How a barrier wait ended.
#[derive(Debug)]
pub enum Barrier<T> {
    /// Every tracked task finished
    Drained(Vec<Finished<T>>),
    /// The deadline passed first; `outstanding` are abandoned, not cancelled
    TimedOut {
        finished: Vec<Finished<T>>,
        outstanding: Vec<TaskHandle>,
    },
}

#[derive(Debug)]
struct TrackerState<T> {
    next_id: u64,
    outstanding: BTreeMap<u64, String>,
    finished: Vec<Finished<T>>,
}

/// Shared collection of outstanding task handles.
#[derive(Debug)]
pub struct Tracker<T> {
    state: Mutex<TrackerState<T>>,
    changed: Condvar,
}

impl<T> Default for Tracker<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                next_id: 0,
                outstanding: BTreeMap::new(),
                finished: Vec::new(),
            }),
            changed: Condvar::new(),
        }
    }
}

impl<T> Tracker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TrackerState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, label: impl Into<String>) -> TaskHandle {
        let mut state = self.state();
        state.next_id += 1;
        let handle = TaskHandle {
            id: state.next_id,
            label: label.into(),
        };
        state.outstanding.insert(handle.id, handle.label.clone());
        handle
    }

    pub fn complete(&self, handle: TaskHandle, result: Result<T>) {
        let mut state = self.state();
        state.outstanding.remove(&handle.id);
        state.finished.push(Finished { handle, result });
        self.changed.notify_all();
    }

    pub fn outstanding(&self) -> usize {
        self.state().outstanding.len()
    }

    /// Collect finished tasks until none is outstanding or `deadline` passes.
    /// Waits in slices of at most [`MAX_WAIT_SLICE`].
    pub fn wait_all(&self, deadline: Instant) -> Barrier<T> {
        let mut collected = Vec::new();
        let mut state = self.state();
        loop {
            collected.append(&mut state.finished);
            if state.outstanding.is_empty() {
                return Barrier::Drained(collected);
            }

            let now = Instant::now();
            if now >= deadline {
                let outstanding = state
                    .outstanding
                    .iter()
                    .map(|(id, label)| TaskHandle {
                        id: *id,
                        label: label.clone(),
                    })
                    .collect();
                return Barrier::TimedOut {
                    finished: collected,
                    outstanding,
                };
            }

            let slice = (deadline - now).min(MAX_WAIT_SLICE);
            state = self
                .changed
                .wait_timeout(state, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Bounded pool of named worker threads.
#[derive(Debug)]
pub struct WorkerPool {
    sender: Sender<Job>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize, name: &str) -> Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = channel::unbounded::<Job>();
        for index in 0..size {
            let receiver: Receiver<Job> = receiver.clone();
            thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || {
                    for job in receiver.iter() {
                        job();
                    }
                })?;
        }
        Ok(Self { sender, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `task` on a worker; its result (or panic) is reported to `tracker`.
    pub fn submit<T, F>(&self, tracker: &Arc<Tracker<T>>, label: impl Into<String>, task: F) -> TaskHandle
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let handle = tracker.register(label);
        let for_job = handle.clone();
        let job_tracker = tracker.clone();
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|payload| {
                Err(Error::TaskPanicked(format!(
                    "{}: {}",
                    for_job.label,
                    panic_message(payload.as_ref())
                )))
            });
            job_tracker.complete(for_job, result);
        });

        if let Err(rejected) = self.sender.send(job) {
            // every worker is gone; run inline so the tracker still completes
            tracing::warn!(task = %handle, "worker pool unavailable, running task inline");
            (rejected.into_inner())();
        }
        handle
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
