//! Binds the listening socket and fans accepted connections out to the
//! worker loops in round-robin order.

use std::net::TcpListener;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::Connection;
use crate::error::Result;
use crate::event_loop::{EventLoop, LoopHandler};
use crate::handler::{EventHandler, UnPacket};
use crate::poller::Readiness;

/// Backlog passed to `listen`, matching the reference implementation.
const LISTEN_BACKLOG: i32 = 128;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub struct Acceptor {
    listener: TcpListener,
    listener_loop: Arc<EventLoop>,
    workers: Vec<Arc<EventLoop>>,
    next_worker: AtomicUsize,
    wheel: Option<Arc<crate::timing_wheel::TimingWheel>>,
    conn_idle_time: Duration,
    handler: Arc<dyn EventHandler>,
    unpacket: Arc<UnPacket>,
}

impl Acceptor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn bind(
        host_port: &str,
        listener_loop: Arc<EventLoop>,
        workers: Vec<Arc<EventLoop>>,
        wheel: Option<Arc<crate::timing_wheel::TimingWheel>>,
        conn_idle_time: Duration,
        handler: Arc<dyn EventHandler>,
        unpacket: Arc<UnPacket>,
    ) -> Result<Arc<Acceptor>> {
        let listener = TcpListener::bind(host_port)?;
        listener.set_nonblocking(true)?;
        log::debug!(target: "ringloop::acceptor", "listening on {}", listener.local_addr()?);

        let acceptor = Arc::new(Acceptor {
            listener,
            listener_loop: Arc::clone(&listener_loop),
            workers,
            next_worker: AtomicUsize::new(0),
            wheel,
            conn_idle_time,
            handler,
            unpacket,
        });
        listener_loop.bind_handler(acceptor.fd(), acceptor.clone() as Arc<dyn LoopHandler>)?;
        Ok(acceptor)
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    /// Next worker loop in strict round-robin order (index mod N).
    fn next_worker(&self) -> Arc<EventLoop> {
        let i = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        Arc::clone(&self.workers[i])
    }

    fn accept_one(&self) -> bool {
        let (stream, addr) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => return false,
            Err(err) => {
                log::warn!(target: "ringloop::acceptor", "accept error: {err}");
                return false;
            }
        };
        if let Err(err) = stream.set_nonblocking(true) {
            log::warn!(target: "ringloop::acceptor", "set_nonblocking failed: {err}");
            return true;
        }
        self.handle_new_connection(stream, addr.to_string());
        true
    }

    fn handle_new_connection(&self, stream: std::net::TcpStream, peer_addr: String) {
        let worker = self.next_worker();
        let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);

        let conn = Connection::new(
            id,
            stream,
            peer_addr,
            Arc::clone(&worker),
            self.wheel.clone(),
            self.conn_idle_time,
            Arc::clone(&self.handler),
            Arc::clone(&self.unpacket),
        );

        // Runs synchronously on the listener thread, before the connection
        // is reachable from its worker loop, so it must not touch buffers.
        self.handler.on_connect(&conn);

        let fd = conn.fd();
        if let Err(err) = worker.bind_handler(fd, conn as Arc<dyn LoopHandler>) {
            log::warn!(target: "ringloop::acceptor", "bind_handler failed for fd {fd}: {err}");
        } else {
            log::debug!(target: "ringloop::acceptor", "accepted connection {id} on fd {fd}");
        }
    }
}

impl LoopHandler for Acceptor {
    fn handle(&self, _fd: RawFd, _readiness: Readiness) {
        // Edge-triggered: drain until EAGAIN.
        while self.accept_one() {}
    }

    fn shutdown(&self) {
        self.listener_loop.delete_fd_in_loop(self.fd());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::default_unpacket;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;

    struct Noop;
    impl EventHandler for Noop {}

    #[test]
    fn round_robins_across_worker_loops() {
        let listener_loop = EventLoop::new("listener").unwrap();
        let worker_a = EventLoop::new("worker-0").unwrap();
        let worker_b = EventLoop::new("worker-1").unwrap();

        let acceptor = Acceptor::bind(
            "127.0.0.1:0",
            Arc::clone(&listener_loop),
            vec![Arc::clone(&worker_a), Arc::clone(&worker_b)],
            None,
            Duration::ZERO,
            Arc::new(Noop) as Arc<dyn EventHandler>,
            Arc::new(default_unpacket()),
        )
        .unwrap();

        assert_eq!(acceptor.next_worker().name(), "worker-0");
        assert_eq!(acceptor.next_worker().name(), "worker-1");
        assert_eq!(acceptor.next_worker().name(), "worker-0");
    }

    #[test]
    fn accepts_and_binds_to_a_worker_loop() {
        let listener_loop = EventLoop::new("listener").unwrap();
        let worker = EventLoop::new("worker-0").unwrap();

        let acceptor = Acceptor::bind(
            "127.0.0.1:0",
            Arc::clone(&listener_loop),
            vec![Arc::clone(&worker)],
            None,
            Duration::ZERO,
            Arc::new(Noop) as Arc<dyn EventHandler>,
            Arc::new(default_unpacket()),
        )
        .unwrap();
        let addr = acceptor.local_addr().unwrap();

        let l_runner = Arc::clone(&listener_loop);
        let l_handle = thread::spawn(move || l_runner.run().unwrap());
        let w_runner = Arc::clone(&worker);
        let w_handle = thread::spawn(move || w_runner.run().unwrap());

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        listener_loop.stop();
        worker.stop();
        l_handle.join().unwrap();
        w_handle.join().unwrap();
    }
}
