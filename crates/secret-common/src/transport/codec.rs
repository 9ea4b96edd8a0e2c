use std::io::{BufReader, ErrorKind, Read, Write};

use crate::error::{Result, SecretError};
use crate::protocol::Frame;

/// Longest accepted length header, newline excluded.
pub const MAX_HEADER_LEN: usize = 128;

/// Maximum frame size (100 MB)
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Outcome of one read on a connection.
#[derive(Debug)]
pub enum Received {
    Frame(Frame),
    /// The peer sent an HTTP request line instead of a length header.
    HttpRequest,
    /// The peer closed the connection before sending any header byte.
    Closed,
}

/// Reads length-prefixed frames from a byte stream.
///
/// The header is consumed byte by byte up to the newline, then exactly
/// `length` bytes are read as the message body.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    pub fn read_frame(&mut self) -> Result<Received> {
        let header = match self.read_header()? {
            Some(header) => header,
            None => return Ok(Received::Closed),
        };

        let header = String::from_utf8_lossy(&header);
        let header = header.trim_end_matches('\r');
        if header.contains("GET ") {
            return Ok(Received::HttpRequest);
        }

        let len = header
            .trim()
            .parse::<usize>()
            .map_err(|_| SecretError::Frame(format!("invalid length header {:?}", header)))?;
        if len > MAX_FRAME_SIZE {
            return Err(SecretError::Frame(format!(
                "Message too large: {} bytes (max {} bytes)",
                len, MAX_FRAME_SIZE
            )));
        }

        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => SecretError::Frame(format!(
                "connection closed inside a {} byte message",
                len
            )),
            _ => map_io_error(e, "reading message body"),
        })?;

        Frame::decode_body(&body).map(Received::Frame)
    }

    /// Returns `None` on a clean close before the first header byte.
    fn read_header(&mut self) -> Result<Option<Vec<u8>>> {
        let mut header = Vec::with_capacity(16);
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) if header.is_empty() => return Ok(None),
                Ok(0) => {
                    return Err(SecretError::Frame(
                        "connection closed inside the length header".to_string(),
                    ))
                }
                Ok(_) if byte[0] == b'\n' => return Ok(Some(header)),
                Ok(_) => {
                    if header.len() == MAX_HEADER_LEN {
                        return Err(SecretError::Frame(format!(
                            "no length delimiter within {} bytes",
                            MAX_HEADER_LEN
                        )));
                    }
                    header.push(byte[0]);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_io_error(e, "reading length header")),
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

/// Writes one frame; the caller flushes.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer
        .write_all(&frame.encode())
        .map_err(|e| map_io_error(e, "writing frame"))
}

pub(crate) fn map_io_error(err: std::io::Error, context: &str) -> SecretError {
    match err.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe => SecretError::Connection(format!("{}: Connection lost", context)),
        _ => SecretError::Io(err),
    }
}
