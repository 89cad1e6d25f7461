//! Server configuration: listen address, worker-loop count, timing-wheel
//! granularity, idle-connection timeout, and the framing codec.
//!
//! Mirrors the reference implementation's functional-options pattern
//! (`Option` closures applied over a `defaultOptions()` struct) as a Rust
//! consuming builder, matching how the teacher's own config types (e.g.
//! `mio::Events::with_capacity`) favor direct construction over a
//! from-scratch options DSL.

use std::time::Duration;

use crate::handler::{default_unpacket, UnPacket};

const DEFAULT_ADDR: &str = "tcp://127.0.0.1:6666";
const DEFAULT_TIMING_WHEEL_TICK: Duration = Duration::from_millis(10);
const DEFAULT_TIMING_WHEEL_SIZE: usize = 1000;
const DEFAULT_CONN_IDLE_TIME: Duration = Duration::from_secs(60);
const MIN_TIMING_WHEEL_TICK: Duration = Duration::from_millis(1);

pub struct Options {
    pub(crate) addr: String,
    pub(crate) conn_event_loop_num: usize,
    pub(crate) timing_wheel_tick: Duration,
    pub(crate) timing_wheel_size: usize,
    pub(crate) conn_idle_time: Duration,
    pub(crate) unpacket: UnPacket,
}

impl Options {
    /// `ConnEventLoopNum` of `0` (the struct default) is resolved to the
    /// host CPU count by `Server::new`, not here, so the meaning of "0" is
    /// visible at the one call site that acts on it.
    pub fn new() -> Options {
        Options {
            addr: DEFAULT_ADDR.to_string(),
            conn_event_loop_num: 0,
            timing_wheel_tick: DEFAULT_TIMING_WHEEL_TICK,
            timing_wheel_size: DEFAULT_TIMING_WHEEL_SIZE,
            conn_idle_time: DEFAULT_CONN_IDLE_TIME,
            unpacket: default_unpacket(),
        }
    }

    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn conn_event_loop_num(mut self, n: usize) -> Self {
        self.conn_event_loop_num = n;
        self
    }

    /// Clamped up to `MIN_TIMING_WHEEL_TICK` with a warning rather than
    /// rejected outright; only `Poller`/`accept` setup failures are fatal.
    pub fn timing_wheel_tick(mut self, tick: Duration) -> Self {
        self.timing_wheel_tick = if tick < MIN_TIMING_WHEEL_TICK {
            log::warn!(
                target: "ringloop::options",
                "timing_wheel_tick {tick:?} below the 1ms floor, clamping"
            );
            MIN_TIMING_WHEEL_TICK
        } else {
            tick
        };
        self
    }

    pub fn timing_wheel_size(mut self, size: usize) -> Self {
        self.timing_wheel_size = size;
        self
    }

    /// `Duration::ZERO` disables idle reaping.
    pub fn conn_idle_time(mut self, idle: Duration) -> Self {
        self.conn_idle_time = idle;
        self
    }

    pub fn unpacket(mut self, unpacket: UnPacket) -> Self {
        self.unpacket = unpacket;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::new()
    }
}

/// Parses `scheme://host:port`. Case-insensitive on scheme; only `tcp` is
/// accepted in the core. Returns the port alone, since the bound address
/// is always the wildcard `0.0.0.0:port` regardless of the host component
/// (matching the reference implementation's listener setup).
pub(crate) fn parse_addr(addr: &str) -> crate::error::Result<u16> {
    let (scheme, rest) = addr.split_once("://").ok_or_else(|| {
        crate::error::Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("address {addr:?} is missing a scheme://"),
        ))
    })?;
    if !scheme.eq_ignore_ascii_case("tcp") {
        return Err(crate::error::Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsupported scheme {scheme:?}, only tcp is accepted"),
        )));
    }
    let port_str = rest.rsplit_once(':').map(|(_, port)| port).unwrap_or(rest);
    port_str.parse::<u16>().map_err(|_| {
        crate::error::Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("address {addr:?} has no valid port"),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let opts = Options::new();
        assert_eq!(opts.addr, "tcp://127.0.0.1:6666");
        assert_eq!(opts.conn_event_loop_num, 0);
        assert_eq!(opts.timing_wheel_size, 1000);
        assert_eq!(opts.conn_idle_time, Duration::from_secs(60));
    }

    #[test]
    fn builder_methods_override_defaults() {
        let opts = Options::new()
            .addr("tcp://0.0.0.0:9000")
            .conn_event_loop_num(4)
            .conn_idle_time(Duration::from_secs(30));
        assert_eq!(opts.addr, "tcp://0.0.0.0:9000");
        assert_eq!(opts.conn_event_loop_num, 4);
        assert_eq!(opts.conn_idle_time, Duration::from_secs(30));
    }

    #[test]
    fn tick_below_one_millisecond_is_clamped() {
        let opts = Options::new().timing_wheel_tick(Duration::from_micros(10));
        assert_eq!(opts.timing_wheel_tick, MIN_TIMING_WHEEL_TICK);
    }

    #[test]
    fn parses_scheme_host_and_port_case_insensitively() {
        assert_eq!(parse_addr("TCP://127.0.0.1:6666").unwrap(), 6666);
        assert_eq!(parse_addr("tcp://example.com:80").unwrap(), 80);
    }

    #[test]
    fn rejects_unsupported_schemes_and_malformed_input() {
        assert!(parse_addr("udp://127.0.0.1:6666").is_err());
        assert!(parse_addr("127.0.0.1:6666").is_err());
        assert!(parse_addr("tcp://127.0.0.1").is_err());
    }
}
