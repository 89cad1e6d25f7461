//! Per-connection state: the descriptor, both ring buffers, and the
//! codec-facing read API, all affined to one event loop for life.

use std::any::Any;
use std::cell::{Cell, UnsafeCell};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::atomic::{AtomicCounter, AtomicFlag};
use crate::buf::{get_byte_buffer, get_ring_buffer, put_byte_buffer, put_ring_buffer, ByteBuffer, RingBuffer};
use crate::error::{Error, Result};
use crate::event_loop::{EventLoop, LoopHandler};
use crate::handler::{EventHandler, UnPacket};
use crate::poller::Readiness;
use crate::timing_wheel::TimingWheel;

/// A cell holding state that is only ever touched on the owning loop's
/// thread, with one documented exception: `Connection::new` populates the
/// user context field on the *listener* thread (via `on_connect`) before
/// the connection is handed to its worker loop, and that handoff through
/// `bind_handler` is the happens-before edge that makes the later,
/// worker-thread-only access safe.
struct LoopCell<T>(UnsafeCell<T>);

unsafe impl<T> Sync for LoopCell<T> {}

impl<T> LoopCell<T> {
    fn new(value: T) -> LoopCell<T> {
        LoopCell(UnsafeCell::new(value))
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn get(&self) -> &mut T {
        &mut *self.0.get()
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub struct Connection {
    id: u64,
    fd: RawFd,
    stream: LoopCell<Option<TcpStream>>,
    loop_: Arc<EventLoop>,
    wheel: Option<Arc<TimingWheel>>,
    self_ref: Weak<Connection>,
    peer_addr: String,
    connected: AtomicFlag,
    last_active: AtomicCounter,
    idle_time: Duration,
    inbound: LoopCell<RingBuffer>,
    outbound: LoopCell<RingBuffer>,
    byte_buffer: LoopCell<ByteBuffer>,
    current_read_len: Cell<usize>,
    current_read_offset: Cell<usize>,
    context: LoopCell<Option<Box<dyn Any + Send>>>,
    status: AtomicCounter,
    version: AtomicU8,
    handler: Arc<dyn EventHandler>,
    unpacket: Arc<UnPacket>,
}

// SAFETY: `Cell`/`UnsafeCell` fields are only mutated on the owning loop's
// thread (see `LoopCell`); `current_read_len`/`current_read_offset` follow
// the same discipline, scoped to a single `handle_read` call.
unsafe impl Sync for Connection {}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        stream: TcpStream,
        peer_addr: String,
        loop_: Arc<EventLoop>,
        wheel: Option<Arc<TimingWheel>>,
        idle_time: Duration,
        handler: Arc<dyn EventHandler>,
        unpacket: Arc<UnPacket>,
    ) -> Arc<Connection> {
        let fd = stream.as_raw_fd();
        let conn = Arc::new_cyclic(|self_ref| Connection {
            id,
            fd,
            stream: LoopCell::new(Some(stream)),
            loop_,
            wheel,
            self_ref: self_ref.clone(),
            peer_addr,
            connected: AtomicFlag::new(true),
            last_active: AtomicCounter::new(now_unix()),
            idle_time,
            inbound: LoopCell::new(get_ring_buffer()),
            outbound: LoopCell::new(get_ring_buffer()),
            byte_buffer: LoopCell::new(get_byte_buffer()),
            current_read_len: Cell::new(0),
            current_read_offset: Cell::new(0),
            context: LoopCell::new(None),
            status: AtomicCounter::new(0),
            version: AtomicU8::new(0),
            handler,
            unpacket,
        });
        conn.schedule_idle_check();
        conn
    }

    fn schedule_idle_check(self: &Arc<Connection>) {
        if self.idle_time.is_zero() {
            return;
        }
        let Some(wheel) = self.wheel.clone() else {
            return;
        };
        let weak = Arc::downgrade(self);
        let idle_time = self.idle_time;
        wheel.schedule(idle_time, Box::new(idle_check_callback(weak, idle_time)));
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn addr(&self) -> &str {
        &self.peer_addr
    }

    /// Returns a cloneable, thread-safe handle to this connection. Holding
    /// one past the callback that received `&Connection` is how an
    /// application keeps a connection reachable for later cross-thread
    /// `write`/`close` calls (e.g. a broadcast registry keyed by
    /// [`Connection::id`]), mirroring how the reference implementation's
    /// `Conn` interface value is itself just stashed by the caller.
    pub fn handle(&self) -> Arc<Connection> {
        self.self_ref
            .upgrade()
            .expect("a live &Connection implies its own Arc is still alive")
    }

    pub fn status(&self) -> i64 {
        self.status.get()
    }

    pub fn set_status(&self, status: i64) {
        self.status.set(status)
    }

    pub fn version(&self) -> u8 {
        self.version.load(Ordering::Acquire)
    }

    pub fn set_version(&self, version: u8) {
        self.version.store(version, Ordering::Release)
    }

    /// Replaces the opaque per-connection user context slot.
    pub fn set_context<T: Any + Send + 'static>(&self, value: T) {
        *unsafe { self.context.get() } = Some(Box::new(value));
    }

    /// Runs `f` with a typed view of the user context slot, or `None` if
    /// it is unset or holds a different type.
    pub fn with_context<T: Any + Send + 'static, R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let slot = unsafe { self.context.get() };
        f(slot.as_ref().and_then(|boxed| boxed.downcast_ref::<T>()))
    }

    fn current_remaining(&self) -> &[u8] {
        let scratch = unsafe { self.loop_.scratch_mut() };
        let (offset, len) = (self.current_read_offset.get(), self.current_read_len.get());
        &scratch[offset..len]
    }

    /// The logical concatenation of the inbound ring buffer and whatever
    /// of the current read slice has not yet been `shift_n`-ed away.
    pub fn read(&self) -> &[u8] {
        let current = self.current_remaining();
        let ring = unsafe { self.inbound.get() };
        if ring.is_empty() {
            current
        } else {
            let bb = unsafe { self.byte_buffer.get() };
            ring.fill_byte_buffer(bb, current);
            bb.as_slice()
        }
    }

    /// The first `n` bytes of [`Connection::read`]; `n == 0` means "all
    /// available" (the Rust rendering of the source's "`n` <= 0").
    pub fn read_n(&self, n: usize) -> &[u8] {
        let all = self.read();
        let want = if n == 0 { all.len() } else { n.min(all.len()) };
        &all[..want]
    }

    /// Consumes `n` bytes from the front of the logical read buffer;
    /// `n == 0` consumes everything pending.
    pub fn shift_n(&self, n: usize) {
        let ring = unsafe { self.inbound.get() };
        let ring_len = ring.len();
        let current_len = self.current_remaining().len();
        let total = ring_len + current_len;
        let effective = if n == 0 { total } else { n.min(total) };

        let from_ring = effective.min(ring_len);
        if from_ring > 0 {
            ring.shift(from_ring);
        }
        let from_current = effective - from_ring;
        if from_current > 0 {
            self.current_read_offset
                .set(self.current_read_offset.get() + from_current);
        }
    }

    /// Discards all pending inbound bytes.
    pub fn reset_buffer(&self) {
        unsafe { self.inbound.get() }.reset();
        self.current_read_offset.set(self.current_read_len.get());
    }

    fn stream(&self) -> &TcpStream {
        unsafe { self.stream.get() }
            .as_ref()
            .expect("stream is only taken during teardown, after which handlers are unreachable")
    }

    /// Edge-triggered: drain until `WouldBlock`. A single `read` per event
    /// would leave bytes beyond the scratch buffer's capacity undelivered
    /// forever once the peer stops sending (no further edge to re-arm on),
    /// so this loops exactly like `Acceptor::handle`'s `accept_one` drain.
    fn handle_read(&self) {
        loop {
            let n = {
                let scratch = unsafe { self.loop_.scratch_mut() };
                match self.stream().read(scratch) {
                    Ok(0) => {
                        self.close_from_loop();
                        return;
                    }
                    Ok(n) => n,
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return,
                    Err(_) => {
                        self.close_from_loop();
                        return;
                    }
                }
            };

            self.last_active.set(now_unix());
            self.current_read_len.set(n);
            self.current_read_offset.set(0);

            while let Some(packet) = (self.unpacket)(self) {
                let reply = self.handler.on_packet(self, &packet);
                if !reply.is_empty() {
                    self.write_internal(&reply);
                }
            }

            let leftover = self.current_remaining();
            if !leftover.is_empty() {
                unsafe { self.inbound.get() }.write(leftover);
            }
            self.current_read_len.set(0);
            self.current_read_offset.set(0);
        }
    }

    fn handle_write(&self) {
        let outbound = unsafe { self.outbound.get() };
        let (head, tail) = outbound.lazy_read_all();
        if head.is_empty() {
            return;
        }

        let stream = self.stream();
        let written = match stream.write(head) {
            Ok(n) => n,
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return,
            Err(_) => {
                self.close_from_loop();
                return;
            }
        };
        outbound.shift(written);

        if written == head.len() && !tail.is_empty() {
            match stream.write(tail) {
                Ok(n) => outbound.shift(n),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(_) => {
                    self.close_from_loop();
                    return;
                }
            }
        }

        if outbound.is_empty() {
            let _ = self.loop_.poller().enable_read(self.fd);
        }
    }

    /// Loop-thread-only write used both for direct replies from
    /// `handle_read` and as the body of the job `Write` enqueues.
    fn write_internal(&self, buf: &[u8]) {
        if buf.is_empty() || !self.connected.get() {
            return;
        }

        let outbound = unsafe { self.outbound.get() };
        if !outbound.is_empty() {
            outbound.write(buf);
            return;
        }

        let stream = self.stream();
        match stream.write(buf) {
            Ok(n) if n == buf.len() => {}
            Ok(n) => {
                outbound.write(&buf[n..]);
                let _ = self.loop_.poller().enable_read_write(self.fd);
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                outbound.write(buf);
                let _ = self.loop_.poller().enable_read_write(self.fd);
            }
            Err(_) => self.close_from_loop(),
        }
    }

    /// Schedules `buf` to be written on the owning loop thread. Thread-safe.
    pub fn write(&self, buf: impl Into<Vec<u8>>) -> Result<()> {
        if !self.connected.get() {
            return Err(Error::ConnectionClosed);
        }
        let buf = buf.into();
        let this = self
            .self_ref
            .upgrade()
            .expect("a live &Connection implies its own Arc is still alive");
        self.loop_.trigger(Box::new(move || {
            this.write_internal(&buf);
            Ok(())
        }));
        Ok(())
    }

    /// Idempotent. Fails with `ConnectionClosed` if already closed,
    /// otherwise schedules teardown on the owning loop thread.
    pub fn close(&self) -> Result<()> {
        if !self.connected.compare_and_set(true, false) {
            return Err(Error::ConnectionClosed);
        }
        let this = self
            .self_ref
            .upgrade()
            .expect("a live &Connection implies its own Arc is still alive");
        self.loop_.trigger(Box::new(move || {
            this.teardown();
            Ok(())
        }));
        Ok(())
    }

    /// Same transition as `close`, taken directly (no `Trigger`) because
    /// the caller is already running on the owning loop thread.
    fn close_from_loop(&self) {
        if self.connected.compare_and_set(true, false) {
            self.teardown();
        }
    }

    fn teardown(&self) {
        self.loop_.delete_fd_in_loop(self.fd);
        self.handler.on_close(self);

        if let Some(stream) = unsafe { self.stream.get() }.take() {
            drop(stream);
        }

        let inbound = std::mem::replace(unsafe { self.inbound.get() }, RingBuffer::new());
        put_ring_buffer(inbound);
        let outbound = std::mem::replace(unsafe { self.outbound.get() }, RingBuffer::new());
        put_ring_buffer(outbound);
        let bb = std::mem::replace(unsafe { self.byte_buffer.get() }, ByteBuffer::new());
        put_byte_buffer(bb);
    }
}

fn idle_check_callback(
    weak: Weak<Connection>,
    idle_time: Duration,
) -> impl FnMut() -> Option<Duration> {
    move || {
        let conn = weak.upgrade()?;
        if !conn.connected.get() {
            return None;
        }
        // `last_active` only has second precision (see the `Connection` data
        // model), but `idle_time` itself is compared at full precision
        // against a real-time `now` rather than being truncated to whole
        // seconds first (otherwise any `ConnIdleTime` under 1s always
        // compares `elapsed >= 0` and reaps on the very first tick).
        let baseline = UNIX_EPOCH + Duration::from_secs(conn.last_active.get().max(0) as u64);
        let elapsed = SystemTime::now()
            .duration_since(baseline)
            .unwrap_or(Duration::ZERO);
        if elapsed >= idle_time {
            let _ = conn.close();
            None
        } else {
            Some((idle_time - elapsed).max(Duration::from_millis(1)))
        }
    }
}

impl LoopHandler for Connection {
    fn handle(&self, _fd: RawFd, readiness: Readiness) {
        if !self.idle_time.is_zero() {
            self.last_active.set(now_unix());
        }

        if readiness.contains(Readiness::ERR) {
            self.close_from_loop();
            return;
        }

        let outbound_empty = unsafe { self.outbound.get() }.is_empty();
        if !outbound_empty {
            if readiness.contains(Readiness::WRITE) {
                self.handle_write();
            }
        } else if readiness.contains(Readiness::READ) {
            self.handle_read();
        }
    }

    fn shutdown(&self) {
        let _ = Connection::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::default_unpacket;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct Echo {
        packets: Arc<AtomicUsize>,
    }

    impl EventHandler for Echo {
        fn on_packet(&self, _conn: &Connection, data: &[u8]) -> Vec<u8> {
            self.packets.fetch_add(1, Ordering::SeqCst);
            data.to_vec()
        }
    }

    fn spawn_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn echo_round_trips_through_the_default_codec() {
        let (mut client, server) = spawn_pair();
        server.set_nonblocking(true).unwrap();
        client.set_nonblocking(false).unwrap();

        let event_loop = EventLoop::new("test").unwrap();
        let packets = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn EventHandler> = Arc::new(Echo {
            packets: Arc::clone(&packets),
        });

        let conn = Connection::new(
            1,
            server,
            "127.0.0.1:0".into(),
            Arc::clone(&event_loop),
            None,
            Duration::ZERO,
            handler,
            Arc::new(default_unpacket()),
        );
        event_loop
            .bind_handler(conn.fd, conn.clone() as Arc<dyn LoopHandler>)
            .unwrap();

        let runner = Arc::clone(&event_loop);
        let handle = thread::spawn(move || runner.run().unwrap());

        use std::io::{Read as _, Write as _};
        client.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(packets.load(Ordering::SeqCst), 1);

        event_loop.stop();
        handle.join().unwrap();
    }

    #[test]
    fn close_is_idempotent_and_fires_on_close_exactly_once() {
        let (client, server) = spawn_pair();
        drop(client);
        server.set_nonblocking(true).unwrap();

        let event_loop = EventLoop::new("test").unwrap();

        struct CountClose(Arc<AtomicUsize>);
        impl EventHandler for CountClose {
            fn on_close(&self, _conn: &Connection) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let closes = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn EventHandler> = Arc::new(CountClose(Arc::clone(&closes)));

        let conn = Connection::new(
            1,
            server,
            "127.0.0.1:0".into(),
            Arc::clone(&event_loop),
            None,
            Duration::ZERO,
            handler,
            Arc::new(default_unpacket()),
        );

        assert!(conn.close().is_ok());
        assert!(matches!(conn.close(), Err(Error::ConnectionClosed)));

        event_loop.jobs.drain();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
