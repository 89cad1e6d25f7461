//! The deferred-closure queue each event loop drains after every batch of
//! readiness events, letting other threads schedule mutations of
//! loop-owned state without a per-connection lock.

use crate::atomic::SpinLock;
use crate::error::Result;

pub type Job = Box<dyn FnOnce() -> Result<()> + Send>;

/// Many threads push; only the owning loop drains. Push appends under the
/// spin lock and reports the new length so the caller can decide whether a
/// wakeup is actually needed (see `EventLoop::trigger`). Drain swaps the
/// whole backlog out under lock and runs it outside the lock, so a job
/// that itself pushes a new job never deadlocks.
#[derive(Default)]
pub struct JobQueue {
    jobs: SpinLock<Vec<Job>>,
}

impl JobQueue {
    pub fn new() -> JobQueue {
        JobQueue {
            jobs: SpinLock::new(Vec::new()),
        }
    }

    /// Appends `job` and returns the queue's length after the append.
    pub fn push(&self, job: Job) -> usize {
        self.jobs.with(|jobs| {
            jobs.push(job);
            jobs.len()
        })
    }

    /// Runs every job queued since the last drain. Jobs pushed by a
    /// running job are left for the next drain, never run in this one.
    /// Errors are logged and swallowed, matching the core's policy of
    /// never letting job failures propagate to the loop.
    pub fn drain(&self) {
        let pending = self.jobs.with(std::mem::take);
        for job in pending {
            if let Err(err) = job() {
                log::warn!(target: "ringloop::job_queue", "job failed: {err}");
            }
        }
    }
}
