//! ZMTP 3.0 wire codec, NULL security mechanism only.
//!
//! Lets a requester talk to a stock message-queue REP backend instead of an
//! `"XR"`-framed one. Layout of a connection:
//!
//! ```text
//! greeting (64B each way) → READY command each way → message frames
//! ```
//!
//! A frame is one flags byte (bit 0 MORE, bit 1 LONG, bit 2 COMMAND), a size
//! (1 byte, or 8 bytes big-endian when LONG), then the body.

use std::fmt;
use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::{FrameError, Result};

/// Size of the greeting each side sends first.
pub const GREETING_SIZE: usize = 64;

/// More frames of the same message follow.
pub const ZMTP_FLAG_MORE: u8 = 0x01;
/// The size field is 8 bytes.
pub const ZMTP_FLAG_LONG: u8 = 0x02;
/// The frame is a command, not message content.
pub const ZMTP_FLAG_COMMAND: u8 = 0x04;

const KNOWN_FLAGS: u8 = ZMTP_FLAG_MORE | ZMTP_FLAG_LONG | ZMTP_FLAG_COMMAND;
const MAJOR_VERSION: u8 = 3;
const MINOR_VERSION: u8 = 0;
const MECHANISM_NULL: &[u8] = b"NULL";
const MECHANISM_SIZE: usize = 20;
const SOCKET_TYPE: &[u8] = b"Socket-Type";
const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Socket roles this codec can announce or accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Req,
    Rep,
}

impl SocketType {
    pub fn as_str(self) -> &'static str {
        match self {
            SocketType::Req => "REQ",
            SocketType::Rep => "REP",
        }
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ZMTP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmtpFrame {
    pub flags: u8,
    pub payload: Bytes,
}

impl ZmtpFrame {
    pub fn has_more(&self) -> bool {
        self.flags & ZMTP_FLAG_MORE != 0
    }

    pub fn is_command(&self) -> bool {
        self.flags & ZMTP_FLAG_COMMAND != 0
    }
}

/// Append our greeting: signature, version 3.0, NULL mechanism, client role.
pub fn encode_greeting(dst: &mut BytesMut) {
    dst.reserve(GREETING_SIZE);
    dst.put_u8(0xFF);
    dst.put_bytes(0, 8);
    dst.put_u8(0x7F);
    dst.put_u8(MAJOR_VERSION);
    dst.put_u8(MINOR_VERSION);
    dst.put_slice(MECHANISM_NULL);
    dst.put_bytes(0, MECHANISM_SIZE - MECHANISM_NULL.len());
    dst.put_u8(0);
    dst.put_bytes(0, 31);
}

/// Validate a peer's greeting.
pub fn check_greeting(greeting: &[u8]) -> Result<()> {
    if greeting.len() < GREETING_SIZE || greeting[0] != 0xFF || greeting[9] != 0x7F {
        return Err(handshake_error("peer did not send a ZMTP signature"));
    }
    if greeting[10] < MAJOR_VERSION {
        return Err(handshake_error(format!(
            "peer speaks ZMTP {}.{}, need 3.0 or later",
            greeting[10], greeting[11]
        )));
    }
    let mechanism = &greeting[12..12 + MECHANISM_SIZE];
    let name_len = mechanism
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(MECHANISM_SIZE);
    if &mechanism[..name_len] != MECHANISM_NULL {
        return Err(handshake_error(format!(
            "unsupported security mechanism {}",
            String::from_utf8_lossy(&mechanism[..name_len])
        )));
    }
    Ok(())
}

/// Append a frame with the given flags; LONG is set when the body needs it.
pub fn encode_zmtp_frame(flags: u8, payload: &[u8], dst: &mut BytesMut) {
    if payload.len() > u8::MAX as usize {
        dst.reserve(9 + payload.len());
        dst.put_u8(flags | ZMTP_FLAG_LONG);
        dst.put_u64(payload.len() as u64);
    } else {
        dst.reserve(2 + payload.len());
        dst.put_u8(flags & !ZMTP_FLAG_LONG);
        dst.put_u8(payload.len() as u8);
    }
    dst.put_slice(payload);
}

/// Decode one frame, or `Ok(None)` if `src` does not hold a complete one.
pub fn decode_zmtp_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<ZmtpFrame>> {
    if src.len() < 2 {
        return Ok(None);
    }
    let flags = src[0];
    if flags & !KNOWN_FLAGS != 0 {
        return Err(FrameError::UnknownFlags(u16::from(flags)));
    }

    let (header, size) = if flags & ZMTP_FLAG_LONG != 0 {
        if src.len() < 9 {
            return Ok(None);
        }
        let mut size = [0u8; 8];
        size.copy_from_slice(&src[1..9]);
        (9, u64::from_be_bytes(size))
    } else {
        (2, u64::from(src[1]))
    };

    let size = usize::try_from(size).unwrap_or(usize::MAX);
    if size > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size,
            max: max_payload,
        });
    }
    if src.len() < header + size {
        src.reserve(header + size - src.len());
        return Ok(None);
    }

    src.advance(header);
    let payload = src.split_to(size).freeze();
    Ok(Some(ZmtpFrame {
        flags: flags & !ZMTP_FLAG_LONG,
        payload,
    }))
}

/// Append a READY command announcing `socket_type`.
pub fn encode_ready(socket_type: SocketType, dst: &mut BytesMut) {
    let mut body = BytesMut::new();
    encode_ready_body(socket_type, &mut body);
    encode_zmtp_frame(ZMTP_FLAG_COMMAND, &body, dst);
}

fn encode_ready_body(socket_type: SocketType, body: &mut BytesMut) {
    let value = socket_type.as_str().as_bytes();
    body.reserve(6 + 1 + SOCKET_TYPE.len() + 4 + value.len());
    body.put_u8(5);
    body.put_slice(b"READY");
    body.put_u8(SOCKET_TYPE.len() as u8);
    body.put_slice(SOCKET_TYPE);
    body.put_u32(value.len() as u32);
    body.put_slice(value);
}

/// Split a command body into name and data.
pub fn parse_command(body: &[u8]) -> Result<(&[u8], &[u8])> {
    let (&len, rest) = body
        .split_first()
        .ok_or_else(|| handshake_error("empty command"))?;
    let len = usize::from(len);
    if rest.len() < len {
        return Err(handshake_error("truncated command name"));
    }
    Ok(rest.split_at(len))
}

/// Socket type announced in a READY command's metadata.
pub fn ready_socket_type(body: &[u8]) -> Result<String> {
    let (name, mut data) = parse_command(body)?;
    if name == b"ERROR" {
        let reason = data.split_first().map_or(&[][..], |(_, reason)| reason);
        return Err(handshake_error(format!(
            "peer refused the connection: {}",
            String::from_utf8_lossy(reason)
        )));
    }
    if name != b"READY" {
        return Err(handshake_error(format!(
            "expected READY, got {}",
            String::from_utf8_lossy(name)
        )));
    }

    while let Some((&name_len, rest)) = data.split_first() {
        let name_len = usize::from(name_len);
        if rest.len() < name_len + 4 {
            return Err(handshake_error("truncated READY property"));
        }
        let (name, rest) = rest.split_at(name_len);
        let (value_len, rest) = rest.split_at(4);
        let value_len =
            u32::from_be_bytes([value_len[0], value_len[1], value_len[2], value_len[3]]) as usize;
        if rest.len() < value_len {
            return Err(handshake_error("truncated READY property"));
        }
        let (value, rest) = rest.split_at(value_len);
        if name.eq_ignore_ascii_case(SOCKET_TYPE) {
            return Ok(String::from_utf8_lossy(value).into_owned());
        }
        data = rest;
    }
    Err(handshake_error("READY carries no Socket-Type"))
}

fn handshake_error(reason: impl Into<String>) -> FrameError {
    FrameError::Handshake(reason.into())
}

/// A byte stream speaking ZMTP.
///
/// Like [`FrameReader`](crate::FrameReader), bytes received before a read
/// timeout are kept, so [`ZmtpStream::try_read_frame`] can be called again.
pub struct ZmtpStream<T> {
    inner: T,
    buf: BytesMut,
    out: BytesMut,
    max_payload_size: usize,
}

impl<T: Read + Write> ZmtpStream<T> {
    pub fn new(inner: T, max_payload_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            out: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload_size,
        }
    }

    /// Exchange greetings and READY commands (blocking, bounded by the
    /// stream's own timeouts). Fails unless the peer announces `peer`.
    pub fn handshake(&mut self, ours: SocketType, peer: SocketType) -> Result<()> {
        self.out.clear();
        encode_greeting(&mut self.out);
        self.write_out()?;

        while self.buf.len() < GREETING_SIZE {
            self.fill()?;
        }
        let greeting = self.buf.split_to(GREETING_SIZE);
        check_greeting(&greeting)?;
        trace!(major = greeting[10], minor = greeting[11], "zmtp greeting accepted");

        let mut ready = BytesMut::new();
        encode_ready_body(ours, &mut ready);
        self.send_command(&ready)?;

        let frame = self.read_frame()?;
        if !frame.is_command() {
            return Err(handshake_error("expected a command after the greeting"));
        }
        let announced = ready_socket_type(&frame.payload)?;
        if announced != peer.as_str() {
            return Err(handshake_error(format!(
                "peer is a {announced} socket, expected {peer}"
            )));
        }
        debug!(ours = %ours, peer = %peer, "zmtp handshake complete");
        Ok(())
    }

    /// Read the next complete frame (blocking).
    pub fn read_frame(&mut self) -> Result<ZmtpFrame> {
        loop {
            if let Some(frame) = decode_zmtp_frame(&mut self.buf, self.max_payload_size)? {
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    /// Read the next frame, or `Ok(None)` if the read timeout elapsed first.
    pub fn try_read_frame(&mut self) -> Result<Option<ZmtpFrame>> {
        match self.read_frame() {
            Ok(frame) => Ok(Some(frame)),
            Err(err) if err.is_timeout() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Write `parts` as one message, MORE on all but the last.
    pub fn send_parts(&mut self, parts: &[Bytes]) -> Result<()> {
        let Some(last) = parts.len().checked_sub(1) else {
            return Err(FrameError::EmptyMessage);
        };
        self.out.clear();
        for (i, part) in parts.iter().enumerate() {
            if part.len() > self.max_payload_size {
                return Err(FrameError::PayloadTooLarge {
                    size: part.len(),
                    max: self.max_payload_size,
                });
            }
            let flags = if i < last { ZMTP_FLAG_MORE } else { 0 };
            encode_zmtp_frame(flags, part, &mut self.out);
        }
        self.write_out()
    }

    /// Write one command frame; `body` starts with the length-prefixed name.
    pub fn send_command(&mut self, body: &[u8]) -> Result<()> {
        self.out.clear();
        encode_zmtp_frame(ZMTP_FLAG_COMMAND, body, &mut self.out);
        self.write_out()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    fn write_out(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.out.len() {
            match self.inner.write(&self.out[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        self.inner.flush().map_err(FrameError::Io)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::thread;
    use std::time::Duration;

    use xrbridge_transport::{Address, TcpTransport};

    use super::*;

    fn greeting() -> BytesMut {
        let mut buf = BytesMut::new();
        encode_greeting(&mut buf);
        buf
    }

    #[test]
    fn greeting_layout() {
        let buf = greeting();
        assert_eq!(buf.len(), GREETING_SIZE);
        assert_eq!(buf[0], 0xFF);
        assert_eq!(buf[9], 0x7F);
        assert_eq!(&buf[10..12], &[3, 0]);
        assert_eq!(&buf[12..16], b"NULL");
        assert!(buf[16..].iter().all(|&b| b == 0));
        check_greeting(&buf).unwrap();
    }

    #[test]
    fn greeting_from_newer_minor_version_is_accepted() {
        let mut buf = greeting();
        buf[11] = 1;
        check_greeting(&buf).unwrap();
    }

    #[test]
    fn foreign_greetings_are_rejected() {
        let mut xr = greeting();
        xr[0] = b'X';
        assert!(matches!(check_greeting(&xr), Err(FrameError::Handshake(_))));

        let mut old = greeting();
        old[10] = 2;
        assert!(matches!(check_greeting(&old), Err(FrameError::Handshake(_))));

        let mut curve = greeting();
        curve[12..17].copy_from_slice(b"CURVE");
        let err = check_greeting(&curve).unwrap_err();
        assert!(err.to_string().contains("CURVE"));
    }

    #[test]
    fn short_and_long_frames() {
        let mut wire = BytesMut::new();
        encode_zmtp_frame(ZMTP_FLAG_MORE, &[7u8; 255], &mut wire);
        assert_eq!(&wire[..2], &[ZMTP_FLAG_MORE, 255]);
        encode_zmtp_frame(0, &[9u8; 256], &mut wire);
        assert_eq!(wire[257], ZMTP_FLAG_LONG);
        assert_eq!(&wire[258..266], &256u64.to_be_bytes());

        let first = decode_zmtp_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert!(first.has_more());
        assert_eq!(first.payload.len(), 255);
        let second = decode_zmtp_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert!(!second.has_more());
        assert_eq!(second.flags, 0);
        assert_eq!(second.payload.len(), 256);
        assert!(wire.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut full = BytesMut::new();
        encode_zmtp_frame(0, &[1u8; 300], &mut full);

        let mut wire = BytesMut::from(&full[..5]);
        assert!(decode_zmtp_frame(&mut wire, usize::MAX).unwrap().is_none());
        wire.extend_from_slice(&full[5..100]);
        assert!(decode_zmtp_frame(&mut wire, usize::MAX).unwrap().is_none());
        wire.extend_from_slice(&full[100..]);
        let frame = decode_zmtp_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(frame.payload.len(), 300);
    }

    #[test]
    fn reserved_flag_bits_and_oversized_frames_are_rejected() {
        let mut wire = BytesMut::from(&[0x08u8, 0][..]);
        assert!(matches!(
            decode_zmtp_frame(&mut wire, usize::MAX),
            Err(FrameError::UnknownFlags(0x08))
        ));

        let mut wire = BytesMut::new();
        encode_zmtp_frame(0, &[0u8; 20], &mut wire);
        assert!(matches!(
            decode_zmtp_frame(&mut wire, 10),
            Err(FrameError::PayloadTooLarge { size: 20, max: 10 })
        ));
    }

    #[test]
    fn ready_announces_socket_type() {
        let mut wire = BytesMut::new();
        encode_ready(SocketType::Req, &mut wire);
        let frame = decode_zmtp_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert!(frame.is_command());
        assert_eq!(ready_socket_type(&frame.payload).unwrap(), "REQ");
    }

    #[test]
    fn error_command_is_reported() {
        let body = b"\x05ERROR\x0bno for you";
        let err = ready_socket_type(body).unwrap_err();
        assert!(err.to_string().contains("no for you"));
    }

    #[test]
    fn send_parts_marks_all_but_last() {
        let mut stream = ZmtpStream::new(Cursor::new(Vec::<u8>::new()), usize::MAX);
        stream
            .send_parts(&[Bytes::new(), Bytes::from_static(b"L")])
            .unwrap();
        assert!(matches!(
            stream.send_parts(&[]),
            Err(FrameError::EmptyMessage)
        ));

        let mut wire = BytesMut::from(stream.get_ref().get_ref().as_slice());
        let delimiter = decode_zmtp_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert!(delimiter.has_more());
        assert!(delimiter.payload.is_empty());
        let body = decode_zmtp_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert!(!body.has_more());
        assert_eq!(body.payload.as_ref(), b"L");
    }

    #[test]
    fn handshake_over_loopback() {
        let listener = TcpTransport::bind(&Address::loopback(0)).unwrap();
        let addr = Address::from(listener.local_addr());

        let server = thread::spawn(move || {
            let stream = listener.accept().unwrap();
            let mut rep = ZmtpStream::new(stream, usize::MAX);
            rep.handshake(SocketType::Rep, SocketType::Req).unwrap();
            let frame = rep.read_frame().unwrap();
            assert_eq!(frame.payload.as_ref(), b"ping");
        });

        let stream = TcpTransport::connect(&addr, Duration::from_secs(2)).unwrap();
        let mut req = ZmtpStream::new(stream, usize::MAX);
        req.handshake(SocketType::Req, SocketType::Rep).unwrap();
        req.send_parts(&[Bytes::from_static(b"ping")]).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn handshake_rejects_wrong_peer_role() {
        let listener = TcpTransport::bind(&Address::loopback(0)).unwrap();
        let addr = Address::from(listener.local_addr());

        let server = thread::spawn(move || {
            let stream = listener.accept().unwrap();
            let mut peer = ZmtpStream::new(stream, usize::MAX);
            // Announces REQ where a REP is expected.
            let _ = peer.handshake(SocketType::Req, SocketType::Req);
        });

        let stream = TcpTransport::connect(&addr, Duration::from_secs(2)).unwrap();
        let mut req = ZmtpStream::new(stream, usize::MAX);
        let err = req.handshake(SocketType::Req, SocketType::Rep).unwrap_err();
        assert!(err.to_string().contains("expected REP"));
        server.join().unwrap();
    }
}
