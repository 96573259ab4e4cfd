//! Socket to the proxy.
use std::{io, net::TcpStream, time::Duration};

mod socket;
#[cfg(feature = "tls")]
mod tls;

pub use socket::{ConnectError, Socket};

/// A stream whose blocking reads can be bounded.
pub trait ReadTimeout {
    fn read_timeout(&self) -> io::Result<Option<Duration>>;

    /// Set read timeout, a zero duration is treated as no timeout.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl ReadTimeout for TcpStream {
    fn read_timeout(&self) -> io::Result<Option<Duration>> {
        TcpStream::read_timeout(self)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout.filter(|t| !t.is_zero()))
    }
}
