// Copyright 2025 SECRET Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! SECRET Common Types and Transport
//!
//! This crate provides the protocol definitions, TCP transport, synchronization
//! primitives and cipher primitives shared by every SECRET peer.
//!
//! # Overview
//!
//! A SECRET session is made of three kinds of peers:
//!
//! - **Coordination Server**: assembles rosters, merges results, ends the session
//! - **Data Providers (DPIs)**: partition, encrypt and stream private records
//! - **Compute Nodes**: decrypt shard-local records and run the computation
//!
//! All of them speak the same length-prefixed text framing:
//!
//! ```text
//! <decimal byte length>\n<senderID> <messageType> <payload>
//! ```
//!
//! # Components
//!
//! - [`protocol`] - Message kinds, peer records, sender identities
//! - [`transport`] - Frame codec, data-frame packing, TCP server and messenger
//! - [`sync`] - Countdown latch, slot, tally and shutdown signal
//! - [`crypto`] - Symmetric/asymmetric cipher and digest primitives
//! - [`record`] - Packed, encrypted genotype records
//! - [`config`] - JSON configuration loading
//!
//! # Example
//!
//! ```
//! use secret_common::protocol::{Frame, SenderId, ProviderMessage};
//!
//! let frame = Frame::new(SenderId::coordinator(), ProviderMessage::Terminate, Vec::new());
//! let encoded = frame.encode();
//! assert_eq!(encoded, b"5\n-1 7 ".to_vec());
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod record;
pub mod sync;
pub mod transport;

pub use error::{Result, SecretError};
pub use protocol::*;
