//! Buffered framed stream.
use std::{
    io::{self, Read, Write},
    time::Duration,
};

use crate::{
    Result,
    net::ReadTimeout,
    protocol::{Frame, FrameReader, FrameWriter, Opcode},
    transport::Transport,
};

/// [`Transport`] implementation over a blocking byte stream.
#[derive(Debug)]
pub struct FramedIo<IO> {
    reader: FrameReader<IO>,
    writer: FrameWriter,
}

impl<IO> FramedIo<IO> {
    pub fn new(io: IO) -> Self {
        Self { reader: FrameReader::new(io), writer: FrameWriter::new() }
    }

    pub fn get_ref(&self) -> &IO {
        self.reader.get_ref()
    }

    pub fn get_mut(&mut self) -> &mut IO {
        self.reader.get_mut()
    }

    pub fn into_inner(self) -> IO {
        self.reader.into_inner()
    }
}

impl<IO> Transport for FramedIo<IO>
where
    IO: Read + Write + ReadTimeout,
{
    fn send(&mut self, opcode: Opcode, payload: &[u8]) {
        self.writer.add(opcode, payload);
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.write_to(self.reader.get_mut())
    }

    fn recv(&mut self) -> Result<Frame> {
        self.reader.read_frame()
    }

    fn reset(&mut self) {
        self.writer.reset();
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<Option<Duration>> {
        let io = self.reader.get_ref();
        let previous = io.read_timeout()?;
        io.set_read_timeout(timeout)?;
        Ok(previous)
    }
}
