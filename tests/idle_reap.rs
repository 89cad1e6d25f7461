mod support;

use ringloop::{EventHandler, Options};
use std::io::Read;
use std::net::TcpStream;
use std::time::{Duration, Instant};

struct NoOp;
impl EventHandler for NoOp {}

#[test]
fn an_idle_connection_is_reaped_and_the_peer_observes_eof() {
    let opts = Options::new()
        .addr("tcp://127.0.0.1:0")
        .conn_event_loop_num(1)
        .timing_wheel_tick(Duration::from_millis(5))
        .timing_wheel_size(64)
        .conn_idle_time(Duration::from_millis(200));
    let (server, addr, handle) = support::spawn(NoOp, opts);

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let start = Instant::now();
    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).expect("read must not time out");
    let elapsed = start.elapsed();

    assert_eq!(n, 0, "peer must observe EOF once the connection is reaped");
    assert!(
        elapsed >= Duration::from_millis(180) && elapsed <= Duration::from_millis(900),
        "reap took {elapsed:?}, expected roughly the 200ms idle window"
    );

    support::stop(server, handle);
}
