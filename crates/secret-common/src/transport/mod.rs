//! SECRET Transport Layer
//!
//! Blocking TCP transport for the SECRET wire protocol.
//!
//! # Architecture
//!
//! - **Wire Format**: `<decimal length>\n<senderID> <messageType> <payload>`
//! - **Inbound**: [`FrameServer`] accepts connections and feeds every frame
//!   read from a connection to a [`FrameHandler`], either from a fixed worker
//!   pool or from one thread per connection
//! - **Outbound**: [`PeerMessenger`] delivers frames to `host:port` peers;
//!   [`TcpMessenger`] is the real implementation
//! - **Data frames**: [`FramePacker`] splits an ordered record stream into
//!   bounded [`DataFrame`] payloads
//!
//! # Message Size Limits
//!
//! Length headers are at most [`MAX_HEADER_LEN`] bytes and frames larger than
//! [`MAX_FRAME_SIZE`] are refused before any buffer is allocated.

pub mod codec;
pub mod data_frame;
pub mod tcp;
pub mod tcp_server;

pub use codec::{write_frame, FrameReader, Received, MAX_FRAME_SIZE, MAX_HEADER_LEN};
pub use data_frame::{DataFrame, FramePacker, DEFAULT_MAX_FRAME_PAYLOAD, FRAME_PADDING};
pub use tcp::{connect, Connection, PeerMessenger, TcpMessenger};
pub use tcp_server::{Dispatch, FrameHandler, FrameServer};
