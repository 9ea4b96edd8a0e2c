use std::io::{BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, SecretError};
use crate::protocol::Frame;
use crate::transport::codec::{map_io_error, write_frame};

/// Timeout for establishing outbound connections (5 seconds)
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects to a `host:port` peer.
///
/// Every resolved address is tried in turn. Reads and writes stay blocking:
/// the protocol has no message-level timeouts.
pub fn connect(addr: &str) -> Result<TcpStream> {
    let socket_addrs = addr
        .to_socket_addrs()
        .map_err(|e| SecretError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

    let mut last_err = None;
    for socket_addr in socket_addrs {
        match TcpStream::connect_timeout(&socket_addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                stream.set_nodelay(true).map_err(|e| {
                    SecretError::Connection(format!("Failed to configure socket: {}", e))
                })?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(SecretError::Connection(format!(
        "Failed to connect to {}: {}",
        addr,
        last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no address resolved".to_string())
    )))
}

/// Outbound connection carrying any number of frames.
pub struct Connection {
    addr: String,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    pub fn open(addr: &str) -> Result<Self> {
        let stream = connect(addr)?;
        Ok(Self {
            addr: addr.to_string(),
            writer: BufWriter::new(stream),
        })
    }

    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        write_frame(&mut self.writer, frame)
    }

    /// Flushes pending frames and closes the connection.
    pub fn close(mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| map_io_error(e, "flushing stream"))?;
        debug!("Closed connection to {}", self.addr);
        Ok(())
    }
}

/// Delivery of frames to peers addressed as `host:port`.
pub trait PeerMessenger: Send + Sync {
    /// Sends a single frame on its own connection.
    fn send(&self, addr: &str, frame: Frame) -> Result<()>;

    /// Sends frames in order on a single connection.
    fn send_batch(&self, addr: &str, frames: Vec<Frame>) -> Result<()> {
        for frame in frames {
            self.send(addr, frame)?;
        }
        Ok(())
    }
}

/// [`PeerMessenger`] over plain TCP connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpMessenger;

impl TcpMessenger {
    pub fn new() -> Self {
        Self
    }
}

impl PeerMessenger for TcpMessenger {
    fn send(&self, addr: &str, frame: Frame) -> Result<()> {
        let mut conn = Connection::open(addr)?;
        conn.send(&frame)?;
        conn.close()
    }

    fn send_batch(&self, addr: &str, frames: Vec<Frame>) -> Result<()> {
        let mut conn = Connection::open(addr)?;
        for frame in &frames {
            conn.send(frame)?;
        }
        conn.close()
    }
}
