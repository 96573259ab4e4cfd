//! The [`Transport`] trait.
use std::{io, time::Duration};

use crate::{
    Result,
    protocol::{Frame, Opcode},
};

/// A buffered stream which can send and receive proxy frames.
pub trait Transport {
    /// Buffer a frame.
    ///
    /// Note that this send is buffered, caller must also call
    /// [`flush`][Transport::flush] afterwards.
    fn send(&mut self, opcode: Opcode, payload: &[u8]);

    /// Write all buffered frames as one message.
    fn flush(&mut self) -> io::Result<()>;

    /// Receive the next frame.
    ///
    /// Batched frames are returned one by one, in order.
    fn recv(&mut self) -> Result<Frame>;

    /// Discard buffered frames that are not yet flushed.
    fn reset(&mut self);

    /// Set the underlying read timeout, returning the previous one.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<Option<Duration>>;
}

impl<P> Transport for &mut P where P: Transport {
    fn send(&mut self, opcode: Opcode, payload: &[u8]) {
        P::send(self, opcode, payload);
    }

    fn flush(&mut self) -> io::Result<()> {
        P::flush(self)
    }

    fn recv(&mut self) -> Result<Frame> {
        P::recv(self)
    }

    fn reset(&mut self) {
        P::reset(self);
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<Option<Duration>> {
        P::set_read_timeout(self, timeout)
    }
}

/// An extension trait to provide convenience senders for [`Transport`].
pub trait TransportExt: Transport {
    /// Buffer a frame without payload.
    fn send_empty(&mut self, opcode: Opcode) {
        self.send(opcode, &[]);
    }

    /// Buffer a frame with a decimal payload.
    fn send_int<I: itoa::Integer>(&mut self, opcode: Opcode, value: I) {
        let mut b = itoa::Buffer::new();
        self.send(opcode, b.format(value).as_bytes());
    }
}

impl<T> TransportExt for T where T: Transport { }
