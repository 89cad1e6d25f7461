//! A thin wrapper around `epoll` plus an `eventfd`-based wakeup channel.
//!
//! Unlike the teacher's `Selector`, which keys registrations by an opaque
//! `Token` to stay generic across backends, this poller is epoll-only and
//! keys registrations directly by the raw file descriptor, matching the
//! reference implementation's `epoll_event.Fd` usage: the kernel already
//! hands back the fd in `data.u64`, so a separate token table buys nothing
//! here.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::atomic::AtomicFlag;

macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* )) => {{
        let res = unsafe { libc::$fn($($arg,)*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

/// Initial size of the event batch array; doubles every time a poll fills
/// it completely, per spec.
const INITIAL_EVENTS_CAPACITY: usize = 128;

/// The abstract readiness set a registered descriptor can report, decoupled
/// from the raw `EPOLL*` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness(u8);

impl Readiness {
    pub const NONE: Readiness = Readiness(0);
    pub const READ: Readiness = Readiness(0b001);
    pub const WRITE: Readiness = Readiness(0b010);
    pub const ERR: Readiness = Readiness(0b100);

    #[inline]
    pub fn contains(self, other: Readiness) -> bool {
        self.0 & other.0 == other.0
    }

    /// Translates raw `epoll_event.events` bits into the abstract set.
    ///
    /// `Err` iff `EPOLLHUP` is set and `EPOLLIN` is not (a peer that closed
    /// without ever becoming readable); `Write` iff `EPOLLERR` or
    /// `EPOLLOUT`; `Read` iff any of `EPOLLIN`, `EPOLLPRI`, `EPOLLRDHUP`.
    /// These are independent checks, not an exclusive match.
    fn from_raw(bits: u32) -> Readiness {
        let bits = bits as libc::c_int;
        let mut r = 0u8;
        if bits & libc::EPOLLHUP != 0 && bits & libc::EPOLLIN == 0 {
            r |= Readiness::ERR.0;
        }
        if bits & libc::EPOLLERR != 0 || bits & libc::EPOLLOUT != 0 {
            r |= Readiness::WRITE.0;
        }
        if bits & libc::EPOLLIN != 0 || bits & libc::EPOLLPRI != 0 || bits & libc::EPOLLRDHUP != 0
        {
            r |= Readiness::READ.0;
        }
        Readiness(r)
    }
}

impl std::ops::BitOr for Readiness {
    type Output = Readiness;
    fn bitor(self, rhs: Readiness) -> Readiness {
        Readiness(self.0 | rhs.0)
    }
}

/// What a caller wants to watch a descriptor for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interest {
    Read,
    Write,
    ReadWrite,
}

impl Interest {
    fn to_epoll_bits(self) -> u32 {
        let base = libc::EPOLLET;
        let bits = match self {
            Interest::Read => base | libc::EPOLLIN | libc::EPOLLRDHUP,
            Interest::Write => base | libc::EPOLLOUT,
            Interest::ReadWrite => base | libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLOUT,
        };
        bits as u32
    }
}

/// Owns the epoll descriptor and the eventfd wakeup descriptor.
///
/// `poll` takes `&self`, not `&mut self`: its growable event batch is local
/// to the call rather than a struct field, so one thread can block inside
/// `poll` while another calls `wake`/`close` concurrently, matching the
/// "safe from any thread" contract on those two operations.
pub struct Poller {
    epfd: OwnedFd,
    waker: OwnedFd,
    running: AtomicFlag,
}

impl Poller {
    /// Allocates the epoll descriptor and the wakeup descriptor, and
    /// installs the wakeup for read interest.
    pub fn new() -> io::Result<Poller> {
        let epfd =
            unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        let waker = unsafe {
            OwnedFd::from_raw_fd(syscall!(eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK))?)
        };

        let poller = Poller {
            epfd,
            waker,
            running: AtomicFlag::new(true),
        };
        poller.ctl(libc::EPOLL_CTL_ADD, poller.waker.as_raw_fd(), Interest::Read)?;
        Ok(poller)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest.to_epoll_bits(),
            u64: fd as u64,
        };
        syscall!(epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut event)).map(|_| ())
    }

    pub fn add_read(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, Interest::Read)
    }

    pub fn add_write(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, Interest::Write)
    }

    pub fn enable_read(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, Interest::Read)
    }

    pub fn enable_write(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, Interest::Write)
    }

    /// Falls back to `ADD` on `ENOENT`: a connection's first `write` can
    /// be triggered from `on_connect`, which runs before the connection's
    /// fd has been registered at all (see `Acceptor::handle_new_connection`),
    /// so the ordinary `MOD` this call otherwise performs may race a
    /// registration that hasn't happened yet.
    pub fn enable_read_write(&self, fd: RawFd) -> io::Result<()> {
        match self.ctl(libc::EPOLL_CTL_MOD, fd, Interest::ReadWrite) {
            Err(ref err) if err.raw_os_error() == Some(libc::ENOENT) => {
                self.ctl(libc::EPOLL_CTL_ADD, fd, Interest::ReadWrite)
            }
            other => other,
        }
    }

    /// Removes `fd` from the reactor. Does not close `fd`.
    pub fn del(&self, fd: RawFd) -> io::Result<()> {
        syscall!(epoll_ctl(
            self.epfd.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            fd,
            std::ptr::null_mut()
        ))
        .map(|_| ())
    }

    /// Writes 8 bytes to the wakeup descriptor. Safe from any thread.
    /// Repeated wakes before a read are coalesced by the kernel counter.
    pub fn wake(&self) -> io::Result<()> {
        let buf = 1u64.to_ne_bytes();
        match (&self.waker).write_all_or_block(&buf) {
            Ok(()) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.drain_waker()?;
                self.wake()
            }
            Err(err) => Err(err),
        }
    }

    fn drain_waker(&self) -> io::Result<()> {
        let mut buf = [0u8; 8];
        match (&self.waker).read_exact_or_block(&mut buf) {
            Ok(()) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Clears the running flag and posts a wake so a blocked `poll` call
    /// observes the flag and returns.
    pub fn close(&self) -> crate::error::Result<()> {
        if !self.running.compare_and_set(true, false) {
            return Err(crate::error::Error::PollerClosed);
        }
        self.wake()?;
        Ok(())
    }

    /// Blocks (timeout -1) waiting for readiness events and dispatches them
    /// to `handler` until the running flag is cleared.
    ///
    /// For every ready descriptor other than the wakeup, `handler(fd,
    /// readiness)` is invoked. After the batch, if the wakeup fired, it is
    /// drained and `handler(-1, Readiness::NONE)` is invoked once as a
    /// synthetic "jobs pending" tick.
    pub fn poll(&self, mut handler: impl FnMut(RawFd, Readiness)) -> io::Result<()> {
        let waker_fd = self.waker.as_raw_fd();
        let mut events: Vec<libc::epoll_event> = Vec::with_capacity(INITIAL_EVENTS_CAPACITY);

        while self.running.get() {
            events.clear();
            let n = loop {
                match syscall!(epoll_wait(
                    self.epfd.as_raw_fd(),
                    events.as_mut_ptr(),
                    events.capacity() as libc::c_int,
                    -1,
                )) {
                    Ok(n) => break n,
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err),
                }
            };
            // SAFETY: `epoll_wait` just populated the first `n` slots.
            unsafe { events.set_len(n as usize) };

            let mut woke = false;
            for i in 0..events.len() {
                let ev = events[i];
                let fd = ev.u64 as RawFd;
                if fd == waker_fd {
                    woke = true;
                    continue;
                }
                handler(fd, Readiness::from_raw(ev.events));
            }

            // A wake that arrives in the same batch that flips `running`
            // to false (e.g. the final wake from `close`) must still
            // reach the handler once: it is this loop's only chance to
            // drain any job queued by a concurrent `shutdown`/`close`
            // before the loop exits for good.
            if woke {
                self.drain_waker()?;
                handler(-1, Readiness::NONE);
            }

            if !self.running.get() {
                return Ok(());
            }

            if events.len() == events.capacity() {
                let new_cap = events.capacity() * 2;
                events.reserve(new_cap - events.capacity());
            }
        }
        Ok(())
    }
}

impl AsRawFd for Poller {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd.as_raw_fd()
    }
}

/// Small helpers so `wake`/`drain_waker` read like the blocking
/// `Read`/`Write` calls they conceptually are, despite the descriptor
/// being non-blocking underneath.
trait RawIo {
    fn write_all_or_block(&self, buf: &[u8]) -> io::Result<()>;
    fn read_exact_or_block(&self, buf: &mut [u8]) -> io::Result<()>;
}

impl RawIo for &OwnedFd {
    fn write_all_or_block(&self, buf: &[u8]) -> io::Result<()> {
        let n = syscall!(write(
            self.as_raw_fd(),
            buf.as_ptr() as *const libc::c_void,
            buf.len()
        ))?;
        if n as usize != buf.len() {
            return Err(io::Error::from(io::ErrorKind::WriteZero));
        }
        Ok(())
    }

    fn read_exact_or_block(&self, buf: &mut [u8]) -> io::Result<()> {
        let n = syscall!(read(
            self.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len()
        ))?;
        if n as usize != buf.len() {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        Ok(())
    }
}
