//! The application-facing framing and event-callback contract.

use crate::connection::Connection;

/// Consumes pending inbound bytes off a connection's read side (see
/// [`Connection::read`]/[`Connection::read_n`]/[`Connection::shift_n`]) and
/// returns one complete packet, or `None` meaning "need more data".
///
/// Implementations are responsible for calling `shift_n` on exactly the
/// bytes they consumed; whatever is left uncommitted is carried over to
/// the next read automatically.
pub type UnPacket = Box<dyn Fn(&Connection) -> Option<Vec<u8>> + Send + Sync>;

/// Returns the entire pending payload as one packet and discards the
/// buffer. Suitable for echo and datagram-over-stream protocols where
/// framing is delegated entirely to the application layer.
pub fn default_unpacket() -> UnPacket {
    Box::new(|conn| {
        let data = conn.read();
        if data.is_empty() {
            return None;
        }
        conn.reset_buffer();
        Some(data.to_vec())
    })
}

/// Application hooks, invoked inline on the owning connection's loop
/// thread. None of these may block: long-running work must be handed off
/// to another thread by the application.
pub trait EventHandler: Send + Sync {
    /// Fired synchronously on the listener thread, before the connection
    /// is bound to its worker loop. Must not touch per-connection buffers;
    /// setting `conn`'s user context is the intended use.
    fn on_connect(&self, conn: &Connection) {
        let _ = conn;
    }

    /// Fired on the owning loop thread once a complete packet has been
    /// framed. A non-empty return value is written back to the peer as if
    /// the handler had called `conn.write(..)` directly.
    fn on_packet(&self, conn: &Connection, data: &[u8]) -> Vec<u8> {
        let _ = (conn, data);
        Vec::new()
    }

    /// Fired exactly once per connection that observed `on_connect`,
    /// regardless of whether the peer, the application, or an idle
    /// timeout initiated the close.
    fn on_close(&self, conn: &Connection) {
        let _ = conn;
    }
}
