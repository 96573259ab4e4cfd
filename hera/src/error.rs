//! `hera` error types.
use std::{backtrace::Backtrace, borrow::Cow, fmt, io, str::Utf8Error, time::Duration};

use crate::{
    connection::ParseError,
    errcode::{Categories, Category, Disposition, ServerError},
    net::ConnectError,
    protocol::ProtocolError,
    row::{DecodeError, RowNotFound},
};

/// A specialized [`Result`] type for `hera` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `hera` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Prefix the error message with `context`.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Returns the server error, if this is one.
    pub fn as_server(&self) -> Option<&ServerError> {
        match &self.kind {
            ErrorKind::Server(e) => Some(e),
            _ => None,
        }
    }

    /// Categories of a server error, aggregated over its chain.
    ///
    /// Errors raised by the client itself have no category.
    pub fn categories(&self) -> Categories {
        self.as_server().map(ServerError::chain_categories).unwrap_or_default()
    }

    /// Returns `true` if the connection that raised this error must be discarded.
    ///
    /// The stream position is unknown after framing, row shape, timeout and io
    /// errors, and the server reports stale sessions through the classifier.
    pub fn is_fatal(&self) -> bool {
        match &self.kind {
            ErrorKind::Protocol(_) | ErrorKind::Timeout(_) | ErrorKind::Io(_) => true,
            ErrorKind::Server(e) => e.chain_categories().contains(Category::StaleConnection),
            _ => false,
        }
    }

    /// Returns what the caller should do about this error.
    pub fn disposition(&self) -> Disposition {
        let mut disposition = Disposition::from(self.categories());
        disposition.discard_connection |= self.is_fatal();
        if let Some(e) = self.as_server() {
            disposition.suppress_telemetry |= !crate::errcode::should_log(e);
        }
        disposition
    }
}

/// All possible error kind from `hera` library.
pub enum ErrorKind {
    Config(ParseError),
    Protocol(ProtocolError),
    Io(io::Error),
    Timeout(TimeoutError),
    Server(ServerError),
    Connect(ConnectError),
    Client(ClientError),
    Decode(DecodeError),
    Utf8(Utf8Error),
    RowNotFound(RowNotFound),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<std::io::Error>e => ErrorKind::Io(e));
from!(<TimeoutError>e => ErrorKind::Timeout(e));
from!(<ServerError>e => ErrorKind::Server(e));
from!(<ConnectError>e => ErrorKind::Connect(e));
from!(<ClientError>e => ErrorKind::Client(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));
from!(<RowNotFound>e => ErrorKind::RowNotFound(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Timeout(e) => e.fmt(f),
            Self::Server(e) => e.fmt(f),
            Self::Connect(e) => e.fmt(f),
            Self::Client(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
            Self::RowNotFound(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Server kept answering `STILL_EXECUTING` past the response deadline.
///
/// The server may still complete the operation, the connection cannot be reused.
pub struct TimeoutError {
    pub waited: Duration,
    pub deadline: Duration,
}

impl std::error::Error for TimeoutError { }

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "response timeout: waited {}ms, deadline {}ms",
            self.waited.as_millis(),
            self.deadline.as_millis()
        )
    }
}

impl fmt::Debug for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Caller misuse, or a control response other than the one required.
pub struct ClientError {
    reason: Cow<'static, str>,
}

impl ClientError {
    pub(crate) fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self { reason: reason.into() }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl std::error::Error for ClientError { }

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl fmt::Debug for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
