use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SecretError};
use crate::protocol::Frame;
use crate::sync::ShutdownSignal;
use crate::transport::codec::{FrameReader, Received};

/// How often the accept loop checks the shutdown signal.
const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// Handles every frame read by a [`FrameServer`].
///
/// An error closes the connection the frame arrived on; the server keeps
/// accepting.
pub trait FrameHandler: Send + Sync + 'static {
    fn handle(&self, frame: Frame, peer: SocketAddr) -> Result<()>;
}

impl<F> FrameHandler for F
where
    F: Fn(Frame, SocketAddr) -> Result<()> + Send + Sync + 'static,
{
    fn handle(&self, frame: Frame, peer: SocketAddr) -> Result<()> {
        self(frame, peer)
    }
}

/// How accepted connections are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Fixed number of workers fed by an unbounded queue; accepting never
    /// waits for a free worker.
    Pool(usize),
    /// One thread per accepted connection.
    ThreadPerConnection,
}

/// Blocking TCP server for SECRET frames.
pub struct FrameServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatch: Dispatch,
}

impl FrameServer {
    /// Creates a new server bound to `bind_addr` (e.g. "0.0.0.0:8500").
    pub fn bind(bind_addr: &str, dispatch: Dispatch) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).map_err(|e| {
            SecretError::Connection(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SecretError::Connection(format!("Failed to get local addr: {}", e)))?;

        Ok(Self {
            listener,
            local_addr,
            dispatch,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `shutdown` is triggered.
    ///
    /// Every connection is read frame by frame until the peer closes it and
    /// each frame is passed to `handler`.
    pub fn run_with_handler<H: FrameHandler>(
        &self,
        handler: Arc<H>,
        shutdown: &ShutdownSignal,
    ) -> Result<()> {
        self.listener.set_nonblocking(true)?;

        let pool = match self.dispatch {
            Dispatch::Pool(size) => {
                let (tx, rx) = unbounded::<(TcpStream, SocketAddr)>();
                for worker in 0..size.max(1) {
                    spawn_pool_worker(worker, rx.clone(), handler.clone())?;
                }
                Some(tx)
            }
            Dispatch::ThreadPerConnection => None,
        };

        info!("Listening on {}", self.local_addr);

        while !shutdown.is_triggered() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!("Dropping connection from {}: {}", peer, e);
                        continue;
                    }
                    debug!("Connection established from {}", peer);

                    match &pool {
                        Some(tx) => {
                            if tx.send((stream, peer)).is_err() {
                                error!("Worker pool is gone, dropping connection from {}", peer);
                            }
                        }
                        None => {
                            let handler = handler.clone();
                            thread::Builder::new()
                                .name(format!("conn-{}", peer))
                                .spawn(move || serve_connection(stream, peer, handler.as_ref()))?;
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    shutdown.wait_timeout(ACCEPT_POLL);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    shutdown.wait_timeout(ACCEPT_POLL);
                }
            }
        }

        info!("Listener on {} shut down", self.local_addr);
        Ok(())
    }
}

fn spawn_pool_worker<H: FrameHandler>(
    worker: usize,
    rx: Receiver<(TcpStream, SocketAddr)>,
    handler: Arc<H>,
) -> Result<()> {
    thread::Builder::new()
        .name(format!("pool-{}", worker))
        .spawn(move || {
            // Ends once the accept loop drops the sender.
            for (stream, peer) in rx.iter() {
                serve_connection(stream, peer, handler.as_ref());
            }
        })?;
    Ok(())
}

/// Reads frames until the peer closes the connection or something fails.
fn serve_connection<H: FrameHandler>(stream: TcpStream, peer: SocketAddr, handler: &H) {
    let mut reader = FrameReader::new(stream);
    loop {
        match reader.read_frame() {
            Ok(Received::Frame(frame)) => {
                debug!(
                    "Frame from {} (sender {}, type {}, {} bytes)",
                    peer,
                    frame.sender,
                    frame.kind,
                    frame.payload.len()
                );
                if let Err(e) = handler.handle(frame, peer) {
                    error!("Closing connection from {}: {}", peer, e);
                    return;
                }
            }
            Ok(Received::HttpRequest) => {
                debug!("HTTP request from {}, closing", peer);
                return;
            }
            Ok(Received::Closed) => {
                debug!("Connection closed by {}", peer);
                return;
            }
            Err(e) => {
                error!("Dropping connection from {}: {}", peer, e);
                return;
            }
        }
    }
}
