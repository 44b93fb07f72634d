//! Background merge execution.
//!
//! A fixed pool of worker threads drains a job channel. At most one merge
//! per segment runs at a time: a submitted merge that overlaps an in-flight
//! one is rejected outright rather than queued, since its source set will
//! be stale by the time the running merge commits. Failures go to a
//! pluggable handler; an aborted merge (index shutting down) is not a
//! failure.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::VellumError;
use crate::segment::merge::MergeSpec;

/// Invoked on a worker thread when a scheduled merge fails.
pub trait MergeFailureHandler: Send + Sync {
    fn on_merge_failure(&self, spec: &MergeSpec, error: &VellumError);
}

/// Default handler: log and carry on. The failed merge's sources stay
/// live, so dropping the merge loses nothing.
pub struct LogMergeFailures;

impl MergeFailureHandler for LogMergeFailures {
    fn on_merge_failure(&self, spec: &MergeSpec, error: &VellumError) {
        error!(target_segment = %spec.target, %error, "background merge failed");
    }
}

type MergeTask = Box<dyn FnOnce() -> crate::error::Result<()> + Send>;

struct Job {
    spec: MergeSpec,
    task: MergeTask,
}

struct SchedulerState {
    in_flight: Mutex<Vec<MergeSpec>>,
    idle: Condvar,
    handler: Arc<dyn MergeFailureHandler>,
}

impl SchedulerState {
    fn finish(&self, spec: &MergeSpec) {
        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|s| s != spec);
        if in_flight.is_empty() {
            self.idle.notify_all();
        }
    }
}

pub struct MergeScheduler {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    state: Arc<SchedulerState>,
}

impl MergeScheduler {
    pub fn new(max_concurrent: usize, handler: Arc<dyn MergeFailureHandler>) -> Self {
        let (tx, rx) = channel::unbounded::<Job>();
        let state = Arc::new(SchedulerState {
            in_flight: Mutex::new(Vec::new()),
            idle: Condvar::new(),
            handler,
        });

        let workers = (0..max_concurrent.max(1))
            .map(|i| {
                let rx: Receiver<Job> = rx.clone();
                let state = Arc::clone(&state);
                std::thread::Builder::new()
                    .name(format!("vellum-merge-{}", i))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            debug!(target_segment = %job.spec.target, "merge starting");
                            match (job.task)() {
                                Ok(()) => {}
                                Err(VellumError::MergeAborted(reason)) => {
                                    debug!(
                                        target_segment = %job.spec.target,
                                        reason,
                                        "merge aborted"
                                    );
                                }
                                Err(e) => state.handler.on_merge_failure(&job.spec, &e),
                            }
                            state.finish(&job.spec);
                        }
                    })
                    .expect("failed to spawn merge worker")
            })
            .collect();

        Self {
            tx: Some(tx),
            workers,
            state,
        }
    }

    /// Submit a merge. Returns `false` without running anything when the
    /// merge overlaps an in-flight one or the scheduler is closed.
    pub fn schedule<F>(&self, spec: MergeSpec, task: F) -> bool
    where
        F: FnOnce() -> crate::error::Result<()> + Send + 'static,
    {
        let Some(tx) = &self.tx else {
            return false;
        };
        {
            let mut in_flight = self.state.in_flight.lock();
            if in_flight.iter().any(|s| s.overlaps(&spec)) {
                debug!(target_segment = %spec.target, "merge overlaps an in-flight merge");
                return false;
            }
            in_flight.push(spec.clone());
        }
        if tx
            .send(Job {
                spec: spec.clone(),
                task: Box::new(task),
            })
            .is_err()
        {
            self.state.finish(&spec);
            return false;
        }
        true
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.lock().len()
    }

    /// Block until every scheduled merge has finished.
    pub fn sync(&self) {
        let mut in_flight = self.state.in_flight.lock();
        while !in_flight.is_empty() {
            self.state.idle.wait(&mut in_flight);
        }
    }

    /// Finish in-flight merges, then stop the workers. Idempotent.
    pub fn close(&mut self) {
        self.sync();
        self.tx = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for MergeScheduler {
    fn drop(&mut self) {
        self.close();
    }
}
