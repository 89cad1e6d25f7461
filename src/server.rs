//! Composes the listener loop, the worker loops, the timing wheel and the
//! acceptor into the single object applications construct and run.
//!
//! Mirrors the reference implementation's `LIMNet`/`TCPServer` split: a
//! connect-loop pool sized from [`Options::conn_event_loop_num`] (falling
//! back to the host CPU count, `runtime.NumCPU()` there), a dedicated
//! listener loop, and an `Acceptor` bound onto it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::acceptor::Acceptor;
use crate::error::Result;
use crate::event_loop::EventLoop;
use crate::handler::EventHandler;
use crate::options::{parse_addr, Options};
use crate::timing_wheel::TimingWheel;

/// A running (or not-yet-started) reactor: one listener loop, N worker
/// loops, an optional idle-reaping timing wheel, and the bound acceptor.
pub struct Server {
    listener_loop: Arc<EventLoop>,
    workers: Vec<Arc<EventLoop>>,
    wheel: Option<Arc<TimingWheel>>,
    acceptor: Arc<Acceptor>,
}

impl Server {
    /// Binds the listen address and wires up the loop pool immediately;
    /// no thread is spawned until [`Server::run`] is called.
    pub fn new(handler: impl EventHandler + 'static, options: Options) -> io::Result<Server> {
        let handler: Arc<dyn EventHandler> = Arc::new(handler);

        let worker_count = if options.conn_event_loop_num == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            options.conn_event_loop_num
        };

        let listener_loop = EventLoop::new("ringloop-listener")?;
        let workers = (0..worker_count)
            .map(|i| EventLoop::new(format!("ringloop-worker-{i}")))
            .collect::<io::Result<Vec<_>>>()?;

        let wheel = if options.conn_idle_time.is_zero() {
            None
        } else {
            Some(TimingWheel::start(options.timing_wheel_tick, options.timing_wheel_size))
        };

        let port = parse_addr(&options.addr).map_err(to_io_error)?;
        let bind_addr = format!("0.0.0.0:{port}");
        let acceptor = Acceptor::bind(
            &bind_addr,
            Arc::clone(&listener_loop),
            workers.clone(),
            wheel.clone(),
            options.conn_idle_time,
            handler,
            Arc::new(options.unpacket),
        )
        .map_err(to_io_error)?;

        log::info!(
            target: "ringloop::server",
            "listening on {} with {} worker loop(s)",
            acceptor.local_addr()?,
            worker_count
        );

        Ok(Server {
            listener_loop,
            workers,
            wheel,
            acceptor,
        })
    }

    /// The bound address, useful when `Options::addr` asks for an
    /// ephemeral port (`:0`).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    /// Spawns every worker loop's dispatcher thread, then runs the
    /// listener loop on the calling thread. Blocks until `stop` causes
    /// every loop to return, joining the worker threads before returning
    /// itself.
    pub fn run(&self) -> io::Result<()> {
        let worker_handles: Vec<JoinHandle<io::Result<()>>> = self
            .workers
            .iter()
            .map(|w| {
                let w = Arc::clone(w);
                thread::Builder::new()
                    .name(w.name().to_string())
                    .spawn(move || w.run())
                    .expect("spawning a worker loop thread must not fail")
            })
            .collect();

        let listener_result = self.listener_loop.run();

        for handle in worker_handles {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        "a worker loop thread panicked",
                    ));
                }
            }
        }
        listener_result
    }

    /// Cooperative shutdown: stops the listener loop (closing every
    /// connection accepted but not yet bound, and the listening socket
    /// itself), stops every worker loop (closing every live connection,
    /// firing `on_close` exactly once each), and stops the timing wheel.
    /// Safe to call from any thread, including while `run` is blocked on
    /// another thread.
    pub fn stop(&self) -> Result<()> {
        self.listener_loop.stop();
        for worker in &self.workers {
            worker.stop();
        }
        if let Some(wheel) = &self.wheel {
            wheel.stop();
        }
        Ok(())
    }
}

fn to_io_error(err: crate::error::Error) -> io::Error {
    match err {
        crate::error::Error::Io(io_err) => io_err,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}
