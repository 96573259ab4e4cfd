//! Netstring style frame codec.
//!
//! A frame is `<len>:<opcode>[ <payload>],` where `len` counts the bytes
//! between the colon and the trailing comma.
use bytes::{BufMut, Bytes, BytesMut};
use std::{
    collections::VecDeque,
    fmt,
    io::{self, Read, Write},
    mem,
    ops::Range,
};

use super::{BATCH, Opcode, ProtocolError};
use crate::{Result, common::verbose, ext::FmtExt};

const READ_CHUNK: usize = 8 * 1024;

/// One opcode and its payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    opcode: Opcode,
    payload: Bytes,
}

impl Frame {
    /// Create new frame.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self { opcode, payload: payload.into() }
    }

    /// Create frame with empty payload.
    pub const fn empty(opcode: Opcode) -> Self {
        Self { opcode, payload: Bytes::new() }
    }

    /// Returns the frame opcode.
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Returns the frame payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume self into the payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Write the wire representation into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        encode(self.opcode, &self.payload, buf);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("opcode", &self.opcode)
            .field("payload", &self.payload.lossy())
            .finish()
    }
}

/// Write one frame into `buf`.
///
/// The separating space is omitted when `payload` is empty.
pub fn encode(opcode: Opcode, payload: &[u8], buf: &mut BytesMut) {
    let mut op_buf = itoa::Buffer::new();
    let op = op_buf.format(opcode).as_bytes();

    let body_len = match payload.is_empty() {
        true => op.len(),
        false => op.len() + 1 + payload.len(),
    };
    let mut len_buf = itoa::Buffer::new();
    let len = len_buf.format(body_len).as_bytes();

    buf.reserve(len.len() + body_len + 2);
    buf.put_slice(len);
    buf.put_u8(b':');
    buf.put_slice(op);
    if !payload.is_empty() {
        buf.put_u8(b' ');
        buf.put_slice(payload);
    }
    buf.put_u8(b',');
}

/// Position of a complete frame at the front of a buffer.
struct Header {
    opcode: Opcode,
    payload: Range<usize>,
    end: usize,
}

/// Returns `None` if `src` does not yet contain a complete frame.
fn parse_header(src: &[u8]) -> Result<Option<Header>, ProtocolError> {
    let mut len = 0usize;
    let mut i = 0;

    loop {
        let Some(&b) = src.get(i) else {
            return Ok(None);
        };
        match b {
            b'0'..=b'9' => {
                len = len
                    .checked_mul(10)
                    .and_then(|len| len.checked_add(usize::from(b - b'0')))
                    .ok_or_else(|| ProtocolError::framing("length prefix overflow"))?;
            }
            b':' if i > 0 => break,
            _ => {
                return Err(ProtocolError::framing(format!(
                    "invalid length prefix at byte {i}: {:?}",
                    [b].lossy()
                )));
            }
        }
        i += 1;
    }

    let start = i + 1;
    let end = start
        .checked_add(len)
        .ok_or_else(|| ProtocolError::framing("length prefix overflow"))?;

    if src.len() <= end {
        return Ok(None);
    }
    if src[end] != b',' {
        return Err(ProtocolError::framing("missing frame terminator"));
    }

    let body = &src[start..end];
    let op_len = body.iter().position(|b| *b == b' ').unwrap_or(body.len());
    let digits = &body[..op_len];

    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::framing(format!(
            "invalid opcode: {:?}",
            digits.lossy()
        )));
    }
    let opcode = digits
        .iter()
        .try_fold(0 as Opcode, |acc, d| {
            acc.checked_mul(10)?.checked_add(Opcode::from(d - b'0'))
        })
        .ok_or_else(|| ProtocolError::framing("opcode overflow"))?;

    let payload_start = match op_len < body.len() {
        true => start + op_len + 1,
        false => end,
    };

    Ok(Some(Header { opcode, payload: payload_start..end, end: end + 1 }))
}

/// Try to split one frame from the front of `buf`.
///
/// Returns `None` if `buf` does not yet contain a complete frame, in which
/// case `buf` is left untouched.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    let Some(header) = parse_header(buf)? else {
        return Ok(None);
    };
    let bytes = buf.split_to(header.end).freeze();
    Ok(Some(Frame { opcode: header.opcode, payload: bytes.slice(header.payload) }))
}

/// Split the payload of a batch frame into its frames.
///
/// Inner frames are returned as is, batches are never nested twice.
pub fn unbatch(mut payload: Bytes) -> Result<Vec<Frame>, ProtocolError> {
    let mut frames = Vec::new();
    while !payload.is_empty() {
        let Some(header) = parse_header(&payload)? else {
            return Err(ProtocolError::framing("truncated frame in batch"));
        };
        let bytes = payload.split_to(header.end);
        frames.push(Frame { opcode: header.opcode, payload: bytes.slice(header.payload) });
    }
    Ok(frames)
}

/// Blocking frame decoder over a byte stream.
pub struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    pending: VecDeque<Frame>,
}

impl<R> FrameReader<R> {
    pub fn new(io: R) -> Self {
        Self { io, buf: BytesMut::with_capacity(READ_CHUNK), pending: VecDeque::new() }
    }

    pub fn get_ref(&self) -> &R {
        &self.io
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.io
    }

    pub fn into_inner(self) -> R {
        self.io
    }

    /// Returns `true` if frames of an already read batch are not consumed yet.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl<R> fmt::Debug for FrameReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameReader")
            .field("buffered", &self.buf.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl<R: Read> FrameReader<R> {
    /// Read one top level frame.
    ///
    /// A batch frame is returned as its constituent frames.
    pub fn read_message(&mut self) -> Result<Vec<Frame>> {
        loop {
            if let Some(frame) = decode(&mut self.buf)? {
                verbose!(opcode = frame.opcode, len = frame.payload.len(), "recv");
                if frame.opcode == BATCH {
                    return Ok(unbatch(frame.payload)?);
                }
                return Ok(vec![frame]);
            }
            self.fill()?;
        }
    }

    /// Read the next frame, frames left over from a batch are served first.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }
            let frames = self.read_message()?;
            self.pending.extend(frames);
        }
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.io.read(&mut chunk) {
                Ok(0) => return Err(ProtocolError::eof().into()),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Outbound frame buffer.
///
/// Frames accumulate until [`write_to`][FrameWriter::write_to], which sends a
/// single frame as is and wraps two or more frames in one batch frame.
#[derive(Debug, Default)]
pub struct FrameWriter {
    buf: BytesMut,
    frames: usize,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a frame.
    pub fn add(&mut self, opcode: Opcode, payload: &[u8]) {
        verbose!(opcode, len = payload.len(), "send");
        encode(opcode, payload, &mut self.buf);
        self.frames += 1;
    }

    /// Buffer a frame with a decimal payload.
    pub fn add_int<I: itoa::Integer>(&mut self, opcode: Opcode, value: I) {
        let mut b = itoa::Buffer::new();
        self.add(opcode, b.format(value).as_bytes());
    }

    /// Returns the number of buffered frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Discard buffered frames.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.frames = 0;
    }

    /// Take buffered frames as one wire message.
    pub fn take(&mut self) -> Bytes {
        let frames = mem::take(&mut self.frames);
        let body = self.buf.split();
        match frames {
            0 | 1 => body.freeze(),
            _ => {
                let mut out = BytesMut::with_capacity(body.len() + 16);
                encode(BATCH, &body, &mut out);
                out.freeze()
            }
        }
    }

    /// Write buffered frames to `io` and flush it.
    pub fn write_to<W: Write>(&mut self, io: &mut W) -> io::Result<()> {
        let message = self.take();
        if message.is_empty() {
            return Ok(());
        }
        io.write_all(&message)?;
        io.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    fn wire(opcode: Opcode, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        encode(opcode, payload, &mut buf);
        buf
    }

    fn reader(bytes: &[u8]) -> FrameReader<Cursor<Vec<u8>>> {
        FrameReader::new(Cursor::new(bytes.to_vec()))
    }

    fn is_framing(err: crate::Error) -> bool {
        matches!(err.kind(), ErrorKind::Protocol(ProtocolError::Framing(_)))
    }

    #[test]
    fn encode_exact_bytes() {
        assert_eq!(&wire(25, b"select 1")[..], b"11:25 select 1,");
        assert_eq!(&wire(5, b"")[..], b"1:5,");
        assert_eq!(&wire(1008, b"")[..], b"4:1008,");
    }

    #[test]
    fn round_trip() {
        let payloads: [&[u8]; 6] = [
            b"",
            b"select * from dual",
            b"a:b,c::,,",
            b" leading space",
            b"12:3 nested,",
            &[0, 1, 0xff, b',', b':'],
        ];
        for opcode in [1, 3, 5, 25, 29, 1008, 2006] {
            for payload in payloads {
                let mut io = reader(&wire(opcode, payload));
                let frame = io.read_frame().unwrap();
                assert_eq!(frame.opcode(), opcode);
                assert_eq!(&frame.payload()[..], payload);
                assert!(io.read_frame().is_err());
            }
        }
    }

    #[test]
    fn space_without_payload() {
        let frame = reader(b"2:5 ,").read_frame().unwrap();
        assert_eq!(frame, Frame::empty(5));
    }

    #[test]
    fn batch_unwrap() {
        let frames = [Frame::new(3, "2"), Frame::new(3, "7"), Frame::empty(6)];

        let mut inner = BytesMut::new();
        for f in &frames {
            f.encode(&mut inner);
        }
        let batch = wire(BATCH, &inner);

        let mut io = reader(&batch);
        assert_eq!(io.read_message().unwrap(), frames);

        let mut io = reader(&batch);
        for f in &frames {
            assert_eq!(&io.read_frame().unwrap(), f);
        }
        assert!(!io.has_pending());
    }

    #[test]
    fn batch_then_plain_frame() {
        let mut bytes = BytesMut::new();
        let mut inner = BytesMut::new();
        encode(3, b"1", &mut inner);
        encode(3, b"0", &mut inner);
        encode(BATCH, &inner, &mut bytes);
        encode(5, b"", &mut bytes);

        let mut io = reader(&bytes);
        assert_eq!(io.read_frame().unwrap(), Frame::new(3, "1"));
        assert!(io.has_pending());
        assert_eq!(io.read_frame().unwrap(), Frame::new(3, "0"));
        assert_eq!(io.read_frame().unwrap(), Frame::empty(5));
    }

    #[test]
    fn framing_errors() {
        assert!(is_framing(reader(b"x:1,").read_frame().unwrap_err()));
        assert!(is_framing(reader(b":1,").read_frame().unwrap_err()));
        assert!(is_framing(reader(b"4:1 ab;").read_frame().unwrap_err()));
        assert!(is_framing(reader(b"3:a b,").read_frame().unwrap_err()));
        assert!(is_framing(reader(b"99999999999999999999999:1,").read_frame().unwrap_err()));
    }

    #[test]
    fn truncated_stream() {
        for bytes in [&b""[..], b"5", b"5:1 ab", b"5:1 abc"] {
            let err = reader(bytes).read_frame().unwrap_err();
            assert!(err.to_string().contains(crate::protocol::UNEXPECTED_EOF), "{err}");
        }
    }

    #[test]
    fn truncated_batch() {
        let batch = wire(BATCH, b"3:1 a,5:1 ab");
        assert!(is_framing(reader(&batch).read_frame().unwrap_err()));
    }

    #[test]
    fn decode_keeps_partial_input() {
        let mut buf = BytesMut::from(&b"11:25 sel"[..]);
        assert_eq!(decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"11:25 sel");
        buf.extend_from_slice(b"ect 1,3:5");
        assert_eq!(decode(&mut buf).unwrap(), Some(Frame::new(25, "select 1")));
        assert_eq!(&buf[..], b"3:5");
    }

    #[test]
    fn writer_single_frame_is_raw() {
        let mut w = FrameWriter::new();
        w.add(25, b"select 1");
        let mut out = Vec::new();
        w.write_to(&mut out).unwrap();
        assert_eq!(out, b"11:25 select 1,");
        assert!(w.is_empty());
    }

    #[test]
    fn writer_wraps_multiple_frames() {
        let mut w = FrameWriter::new();
        w.add(4, b"");
        w.add_int(7, 0);
        assert_eq!(w.frames(), 2);
        let mut out = Vec::new();
        w.write_to(&mut out).unwrap();
        assert_eq!(out, b"12:0 1:4,3:7 0,,");

        let frames = reader(&out).read_message().unwrap();
        assert_eq!(frames, [Frame::empty(4), Frame::new(7, "0")]);
    }

    #[test]
    fn writer_reset_and_empty_flush() {
        let mut w = FrameWriter::new();
        w.add(1, b"x");
        w.reset();
        let mut out = Vec::new();
        w.write_to(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
