//! `ringloop`: a multi-loop, epoll-based TCP reactor.
//!
//! Accepts connections on a dedicated listener loop, fans them out
//! round-robin to a pool of worker loops (one OS thread each), and drives
//! non-blocking reads and writes through a pair of pooled ring buffers
//! per connection. Applications frame the byte stream with an
//! [`UnPacket`] codec and receive complete packets through an
//! [`EventHandler`].
//!
//! ```no_run
//! use ringloop::{Connection, EventHandler, Options, Server};
//!
//! struct Echo;
//!
//! impl EventHandler for Echo {
//!     fn on_packet(&self, _conn: &Connection, data: &[u8]) -> Vec<u8> {
//!         data.to_vec()
//!     }
//! }
//!
//! # fn main() -> std::io::Result<()> {
//! let server = Server::new(Echo, Options::new().addr("tcp://127.0.0.1:6666"))?;
//! server.run()
//! # }
//! ```
//!
//! Only a Unix `epoll`-based reactor is implemented; there is no fallback
//! poller for other platforms.

#![cfg(unix)]

mod acceptor;
mod atomic;
mod buf;
mod connection;
mod error;
mod event_loop;
mod handler;
mod job_queue;
mod options;
mod poller;
mod server;
mod timing_wheel;

pub use connection::Connection;
pub use error::{Error, Result};
pub use handler::{default_unpacket, EventHandler, UnPacket};
pub use options::Options;
pub use server::Server;
