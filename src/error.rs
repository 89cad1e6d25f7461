use std::fmt;
use std::io;

/// Errors surfaced by the reactor core.
///
/// I/O failures on a connection are absorbed internally and only ever
/// surface to the application as `OnClose`; a caller only observes
/// `Error` values from `Conn::write`/`Conn::close` (always
/// `ConnectionClosed` once the connection has gone away) and from
/// one-shot setup calls like `Server::run`.
#[derive(Debug)]
pub enum Error {
    /// Returned by `Conn::write`/`Conn::close` once the connection's
    /// `connected` flag has flipped to `false`.
    ConnectionClosed,
    /// A read was attempted on a ring buffer with `is_empty() == true`.
    RingBufferEmpty,
    /// `Poller::close` was called on a poller that is not running.
    PollerClosed,
    /// An opaque kernel-reported I/O failure.
    Io(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionClosed => f.write_str("connection is closed"),
            Error::RingBufferEmpty => f.write_str("ring buffer is empty"),
            Error::PollerClosed => f.write_str("poller is not running"),
            Error::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl Error {
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }
}
