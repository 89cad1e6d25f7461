//! A single dispatcher thread: one poller, a descriptor-to-handler table,
//! a 64 KiB scratch read buffer, and a job queue that linearises
//! cross-thread mutation onto this loop.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

use crate::atomic::{AtomicFlag, SpinLock};
use crate::error::Result;
use crate::job_queue::{Job, JobQueue};
use crate::poller::{Poller, Readiness};

/// Matches the reference implementation's per-loop read buffer size.
pub(crate) const SCRATCH_SIZE: usize = 64 * 1024;

/// The behavioural contract every registered descriptor's owner
/// implements: `Connection` for accepted sockets, `Acceptor` for the
/// listening socket.
pub(crate) trait LoopHandler: Send + Sync {
    fn handle(&self, fd: RawFd, readiness: Readiness);

    /// Invoked once, from `EventLoop::stop`, possibly from a thread other
    /// than this loop's own. Implementations must route any state mutation
    /// back onto the owning loop thread themselves (see
    /// `Connection::close`), since the handler table itself is the only
    /// piece guaranteed to be gone once this returns.
    fn shutdown(&self);
}

pub struct EventLoop {
    name: String,
    poller: Poller,
    handlers: SpinLock<HashMap<RawFd, Arc<dyn LoopHandler>>>,
    pub(crate) jobs: JobQueue,
    event_handling: AtomicFlag,
    scratch: UnsafeCell<[u8; SCRATCH_SIZE]>,
}

// SAFETY: `scratch` is only ever accessed, via `scratch_mut`, from the
// single thread that is currently inside this loop's `run`/`poll` call.
unsafe impl Sync for EventLoop {}

impl EventLoop {
    pub fn new(name: impl Into<String>) -> io::Result<Arc<EventLoop>> {
        Ok(Arc::new(EventLoop {
            name: name.into(),
            poller: Poller::new()?,
            handlers: SpinLock::new(HashMap::new()),
            jobs: JobQueue::new(),
            event_handling: AtomicFlag::new(false),
            scratch: UnsafeCell::new([0u8; SCRATCH_SIZE]),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn poller(&self) -> &Poller {
        &self.poller
    }

    /// SAFETY: caller must be running on this loop's own dispatch thread.
    pub(crate) unsafe fn scratch_mut(&self) -> &mut [u8] {
        &mut *self.scratch.get()
    }

    /// Stores the mapping, then asserts read interest on `fd`; on failure
    /// the mapping is rolled back.
    ///
    /// `EEXIST` is treated as success rather than failure: a connection's
    /// `on_connect` runs before this call and may itself trigger a write
    /// that registers `fd` first (see `Poller::enable_read_write`), so by
    /// the time this runs the fd can already be present with broader
    /// interest than plain read.
    pub(crate) fn bind_handler(&self, fd: RawFd, handler: Arc<dyn LoopHandler>) -> Result<()> {
        self.handlers.with(|map| {
            map.insert(fd, handler);
        });
        match self.poller.add_read(fd) {
            Ok(()) => Ok(()),
            Err(ref err) if err.raw_os_error() == Some(libc::EEXIST) => Ok(()),
            Err(err) => {
                self.handlers.with(|map| {
                    map.remove(&fd);
                });
                Err(err.into())
            }
        }
    }

    /// Removes `fd` from the reactor and the handler table. Must be called
    /// from this loop's own thread.
    pub(crate) fn delete_fd_in_loop(&self, fd: RawFd) {
        let _ = self.poller.del(fd);
        self.handlers.with(|map| {
            map.remove(&fd);
        });
    }

    /// Enqueues `job` and posts a wake unless the loop is certain to drain
    /// it without one: a post-push length of 1 means no wake is already in
    /// flight, and "currently handling an event" means a drain is imminent
    /// regardless.
    pub fn trigger(&self, job: Job) {
        let new_len = self.jobs.push(job);
        if new_len == 1 && !self.event_handling.get() {
            if let Err(err) = self.poller.wake() {
                log::warn!(target: "ringloop::event_loop", "{}: wake failed: {err}", self.name);
            }
        }
    }

    fn dispatch(&self, fd: RawFd, readiness: Readiness) {
        log::trace!(target: "ringloop::event_loop", "{}: dispatch fd={fd} readiness={readiness:?}", self.name);
        self.event_handling.set(true);
        if fd != -1 {
            let handler = self.handlers.with(|map| map.get(&fd).cloned());
            if let Some(handler) = handler {
                handler.handle(fd, readiness);
            }
        }
        self.event_handling.set(false);
        self.jobs.drain();
    }

    /// Runs the loop body until `stop` is called. Blocks the calling
    /// thread.
    pub fn run(&self) -> io::Result<()> {
        self.poller.poll(|fd, readiness| self.dispatch(fd, readiness))
    }

    /// Closes every registered handler, then the poller, which wakes a
    /// blocked `run` and lets it return.
    pub fn stop(&self) {
        let handlers: Vec<_> = self
            .handlers
            .with(|map| map.drain().map(|(_, handler)| handler).collect());
        for handler in handlers {
            handler.shutdown();
        }
        if let Err(err) = self.poller.close() {
            log::warn!(target: "ringloop::event_loop", "{}: close failed: {err}", self.name);
        }
    }
}
