//! SECRET protocol definitions.
//!
//! - [`frame`]: the `<senderID> <messageType> <payload>` body of every message
//! - [`message`]: message kinds understood by each peer role
//! - [`peer`]: peer records and rosters exchanged during registration

pub mod frame;
pub mod message;
pub mod peer;


pub use frame::{Frame, SenderId, EOF_SENTINEL};
pub use message::{ComputeMessage, CoordinatorMessage, MessageKind, ProviderMessage};
pub use peer::{GlobalId, PeerInfo, Roster};
