#![allow(dead_code)]

use ringloop::{EventHandler, Options, Server};
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Initialises the logger once per test binary, matching the teacher's own
/// `tests/util/mod.rs::init` helper.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

/// Binds `handler`/`options`, spawns the server onto its own thread, and
/// gives the listener loop a moment to register before returning the
/// address a client can dial.
pub fn spawn(
    handler: impl EventHandler + 'static,
    options: Options,
) -> (Arc<Server>, SocketAddr, JoinHandle<()>) {
    init();
    let server = Arc::new(Server::new(handler, options).expect("server must bind"));
    let addr = server.local_addr().expect("server must have a local address");
    let runner = Arc::clone(&server);
    let handle = thread::spawn(move || runner.run().expect("server loop must not error"));
    thread::sleep(Duration::from_millis(30));
    (server, addr, handle)
}

pub fn stop(server: Arc<Server>, handle: JoinHandle<()>) {
    server.stop().expect("stop must succeed");
    handle.join().expect("server thread must not panic");
}
