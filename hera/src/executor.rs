//! The [`Executor`] trait.
use std::io::{Read, Write};

use crate::{connection::Connection, net::ReadTimeout};

/// A type that can lend a [`Connection`].
pub trait Executor {
    /// Stream of the lent connection.
    type Io: Read + Write + ReadTimeout;

    /// Borrow the connection.
    fn connection(&mut self) -> &mut Connection<Self::Io>;
}

impl<IO> Executor for Connection<IO>
where
    IO: Read + Write + ReadTimeout,
{
    type Io = IO;

    fn connection(&mut self) -> &mut Connection<IO> {
        self
    }
}

impl<E: Executor + ?Sized> Executor for &mut E {
    type Io = E::Io;

    fn connection(&mut self) -> &mut Connection<E::Io> {
        E::connection(self)
    }
}
