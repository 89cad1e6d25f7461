mod support;

use ringloop::{Connection, EventHandler, Options};
use std::io::{Read, Write as _};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const THREADS: usize = 8;
const WRITES_PER_THREAD: usize = 1000;

/// Hands every accepted connection's handle out through shared state so the
/// test can drive it from threads that have nothing to do with the
/// reactor's own loop threads, the pattern an application uses to keep a
/// `Conn` reachable for a broadcast registry.
struct Registry {
    conn: Arc<Mutex<Option<Arc<Connection>>>>,
    ready: Arc<AtomicBool>,
}

impl EventHandler for Registry {
    fn on_connect(&self, conn: &Connection) {
        *self.conn.lock().unwrap() = Some(conn.handle());
        self.ready.store(true, Ordering::SeqCst);
    }
}

#[test]
fn writes_from_unrelated_threads_all_arrive() {
    let conn_slot = Arc::new(Mutex::new(None));
    let ready = Arc::new(AtomicBool::new(false));
    let handler = Registry {
        conn: Arc::clone(&conn_slot),
        ready: Arc::clone(&ready),
    };

    let opts = Options::new()
        .addr("tcp://127.0.0.1:0")
        .conn_event_loop_num(1)
        .conn_idle_time(Duration::ZERO);
    let (server, addr, handle) = support::spawn(handler, opts);

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(10))).unwrap();

    while !ready.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(5));
    }
    let conn = conn_slot.lock().unwrap().clone().unwrap();

    let writers: Vec<_> = (0..THREADS)
        .map(|_| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                for _ in 0..WRITES_PER_THREAD {
                    conn.write(b"X".to_vec()).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let mut received = vec![0u8; THREADS * WRITES_PER_THREAD];
    client.read_exact(&mut received).unwrap();
    assert!(received.iter().all(|&b| b == b'X'));

    support::stop(server, handle);
}
