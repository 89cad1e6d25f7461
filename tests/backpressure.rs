mod support;

use ringloop::{Connection, EventHandler, Options};
use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

const PAYLOAD_LEN: usize = 16 * 1024 * 1024;

struct BigWriter;

impl EventHandler for BigWriter {
    fn on_connect(&self, conn: &Connection) {
        conn.write(vec![0xABu8; PAYLOAD_LEN])
            .expect("write must succeed on a freshly accepted connection");
    }
}

#[test]
fn a_large_write_is_staged_and_delivered_unchanged() {
    let opts = Options::new()
        .addr("tcp://127.0.0.1:0")
        .conn_event_loop_num(1)
        .conn_idle_time(Duration::ZERO);
    let (server, addr, handle) = support::spawn(BigWriter, opts);

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(10))).unwrap();

    // Let the server stage the whole payload in its outbound ring buffer
    // before we ever read, forcing at least one partial-write/EAGAIN cycle.
    std::thread::sleep(Duration::from_millis(300));

    let mut received = vec![0u8; PAYLOAD_LEN];
    client.read_exact(&mut received).expect("all 16MiB must eventually arrive");
    assert!(received.iter().all(|&b| b == 0xAB), "payload must be delivered unchanged");

    support::stop(server, handle);
}
