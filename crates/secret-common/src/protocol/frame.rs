use std::fmt;

use crate::error::{Result, SecretError};
use crate::protocol::message::MessageKind;
use crate::protocol::peer::GlobalId;

/// Reserved payload that marks the last result fragment of a Compute Node.
pub const EOF_SENTINEL: &str = "EOF";

/// Identity token placed in front of every message body.
///
/// Compute Nodes use their [`GlobalId`], Data Providers their configured name,
/// the Coordination Server `-1` and the cross-provider sync step `-2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderId(String);

impl SenderId {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() || token.bytes().any(|b| b == b' ' || b == b'\n') {
            return Err(SecretError::Protocol(format!(
                "invalid sender id {:?}",
                token
            )));
        }
        Ok(Self(token))
    }

    pub fn coordinator() -> Self {
        Self("-1".to_string())
    }

    pub fn sync() -> Self {
        Self("-2".to_string())
    }

    pub fn compute(id: GlobalId) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interprets the token as a Compute Node identity.
    pub fn global_id(&self) -> Result<GlobalId> {
        self.0
            .parse::<usize>()
            .map(GlobalId)
            .map_err(|_| SecretError::Protocol(format!("sender {:?} is not a global id", self.0)))
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One protocol message.
///
/// The wire form is `<len>\n<sender> <kind> <payload>` where `len` counts every
/// byte after the newline. The payload is opaque bytes and may contain
/// newlines; only the length header is line-delimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sender: SenderId,
    pub kind: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(sender: SenderId, kind: impl MessageKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            sender,
            kind: kind.code(),
            payload: payload.into(),
        }
    }

    /// Decodes the typed kind of this frame for the receiving role.
    pub fn kind<K: MessageKind>(&self) -> Result<K> {
        K::from_code(self.kind).ok_or_else(|| {
            SecretError::Protocol(format!(
                "unrecognized {} message type {}",
                K::ROLE,
                self.kind
            ))
        })
    }

    /// The payload as UTF-8 text.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| SecretError::Protocol(format!("payload is not UTF-8: {}", e)))
    }

    /// Serialized message body (everything after the length header).
    pub fn body(&self) -> Vec<u8> {
        let prefix = format!("{} {} ", self.sender, self.kind);
        let mut body = Vec::with_capacity(prefix.len() + self.payload.len());
        body.extend_from_slice(prefix.as_bytes());
        body.extend_from_slice(&self.payload);
        body
    }

    /// Full wire encoding, including the length header.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body();
        let header = format!("{}\n", body.len());
        let mut out = Vec::with_capacity(header.len() + body.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Parses a message body previously produced by [`Frame::body`].
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let sender_end = body
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| SecretError::Protocol("missing sender id".to_string()))?;
        let sender = std::str::from_utf8(&body[..sender_end])
            .map_err(|_| SecretError::Protocol("sender id is not UTF-8".to_string()))?;
        let sender = SenderId::new(sender)?;

        let rest = &body[sender_end + 1..];
        let (kind, payload) = match rest.iter().position(|&b| b == b' ') {
            Some(end) => (&rest[..end], &rest[end + 1..]),
            None => (rest, &[][..]),
        };
        let kind = std::str::from_utf8(kind)
            .ok()
            .and_then(|k| k.parse::<u32>().ok())
            .ok_or_else(|| {
                SecretError::Protocol(format!(
                    "unparsable message type {:?}",
                    String::from_utf8_lossy(kind)
                ))
            })?;

        Ok(Self {
            sender,
            kind,
            payload: payload.to_vec(),
        })
    }
}
