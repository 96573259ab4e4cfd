use std::{
    fmt,
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    thread,
    time::Duration,
};

use socket2::SockRef;

use super::ReadTimeout;
use crate::{common::logging, connection::Config};

/// Either plain tcp or tls stream to the proxy.
pub struct Socket {
    kind: Kind,
}

enum Kind {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<super::tls::TlsStream>),
}

impl Socket {
    /// Connect to the configured endpoint.
    ///
    /// A failed attempt is retried `hera.connection.retries` more times, with
    /// `hera.connection.retry_delay.ms` between attempts.
    pub fn connect(config: &Config) -> Result<Socket, ConnectError> {
        let attempts = config.retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match Self::try_connect(config) {
                Ok(socket) => return Ok(socket),
                Err(_err) if attempt < attempts => {
                    logging!(
                        warn,
                        "connect to {}:{} failed, attempt {attempt}/{attempts}: {_err}",
                        config.host,
                        config.port
                    );
                    if !config.retry_delay.is_zero() {
                        thread::sleep(config.retry_delay);
                    }
                }
                Err(source) => {
                    return Err(ConnectError {
                        host: config.host.clone(),
                        port: config.port,
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    fn try_connect(config: &Config) -> io::Result<Socket> {
        let tcp = connect_tcp(&config.host, config.port, config.connect_timeout)?;
        tcp.set_nodelay(config.tcp_nodelay)?;
        ReadTimeout::set_read_timeout(&tcp, config.socket_timeout)?;

        set_buffer_sizes(&tcp, config);

        #[cfg(feature = "tls")]
        if config.tls {
            let tls = super::tls::connect(config, tcp)?;
            return Ok(Socket { kind: Kind::Tls(Box::new(tls)) });
        }

        Ok(Socket { kind: Kind::Tcp(tcp) })
    }

    fn tcp(&self) -> &TcpStream {
        match &self.kind {
            Kind::Tcp(tcp) => tcp,
            #[cfg(feature = "tls")]
            Kind::Tls(tls) => tls.get_ref(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    /// Returns `true` if the stream is encrypted.
    pub fn is_tls(&self) -> bool {
        match self.kind {
            Kind::Tcp(_) => false,
            #[cfg(feature = "tls")]
            Kind::Tls(_) => true,
        }
    }

    /// Shut down both halves of the connection.
    pub fn shutdown(&self) -> io::Result<()> {
        self.tcp().shutdown(std::net::Shutdown::Both)
    }
}

/// Apply the requested socket buffer sizes, `0` keeps the os default.
fn set_buffer_sizes(tcp: &TcpStream, config: &Config) {
    let socket = SockRef::from(tcp);
    if config.send_buffer > 0 {
        if let Err(_err) = socket.set_send_buffer_size(config.send_buffer as usize) {
            logging!(warn, "failed to set send buffer to {}: {_err}", config.send_buffer);
        }
    }
    if config.receive_buffer > 0 {
        if let Err(_err) = socket.set_recv_buffer_size(config.receive_buffer as usize) {
            logging!(warn, "failed to set receive buffer to {}: {_err}", config.receive_buffer);
        }
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last = None;
    for addr in (host, port).to_socket_addrs()? {
        let result = match timeout.is_zero() {
            true => TcpStream::connect(addr),
            false => TcpStream::connect_timeout(&addr, timeout),
        };
        match result {
            Ok(tcp) => return Ok(tcp),
            Err(err) => last = Some(err),
        }
    }
    Err(last.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "could not resolve to any address")
    }))
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.kind {
            Kind::Tcp(tcp) => tcp.read(buf),
            #[cfg(feature = "tls")]
            Kind::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.kind {
            Kind::Tcp(tcp) => tcp.write(buf),
            #[cfg(feature = "tls")]
            Kind::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.kind {
            Kind::Tcp(tcp) => tcp.flush(),
            #[cfg(feature = "tls")]
            Kind::Tls(tls) => tls.flush(),
        }
    }
}

impl ReadTimeout for Socket {
    fn read_timeout(&self) -> io::Result<Option<Duration>> {
        self.tcp().read_timeout()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        ReadTimeout::set_read_timeout(self.tcp(), timeout)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("local", &self.local_addr().ok())
            .field("peer", &self.peer_addr().ok())
            .field("tls", &self.is_tls())
            .finish()
    }
}

/// An error when the socket cannot be established after all attempts.
pub struct ConnectError {
    pub host: String,
    pub port: u16,
    pub attempts: u32,
    pub source: io::Error,
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to connect to {}:{} after {} attempt(s): {}",
            self.host, self.port, self.attempts, self.source
        )
    }
}

impl fmt::Debug for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
