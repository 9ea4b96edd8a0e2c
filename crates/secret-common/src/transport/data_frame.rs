//! Bounded payloads for streamed records.
//!
//! A data frame payload is `ordinal(\tlength)*\n<records>`: the ordinal of
//! the fragment, the byte length of every record, then the records
//! concatenated without separators.

use crate::error::{Result, SecretError};

/// Default upper bound for a data frame payload.
pub const DEFAULT_MAX_FRAME_PAYLOAD: usize = 65_535;

/// Slack reserved for the ordinal and the frame header.
pub const FRAME_PADDING: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub ordinal: usize,
    pub records: Vec<String>,
}

impl DataFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut header = self.ordinal.to_string();
        for record in &self.records {
            header.push('\t');
            header.push_str(&record.len().to_string());
        }
        header.push('\n');

        let total = header.len() + self.records.iter().map(String::len).sum::<usize>();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(header.as_bytes());
        for record in &self.records {
            out.extend_from_slice(record.as_bytes());
        }
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let split = payload
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| SecretError::Protocol("data frame without header line".to_string()))?;
        let header = std::str::from_utf8(&payload[..split])
            .map_err(|_| SecretError::Protocol("data frame header is not UTF-8".to_string()))?;
        let body = &payload[split + 1..];

        let mut fields = header.split('\t');
        let ordinal = fields
            .next()
            .unwrap_or_default()
            .parse::<usize>()
            .map_err(|e| SecretError::Protocol(format!("invalid data frame ordinal: {}", e)))?;

        let mut records = Vec::new();
        let mut offset = 0;
        for field in fields {
            let len = field.parse::<usize>()?;
            let end = offset + len;
            if end > body.len() {
                return Err(SecretError::Protocol(format!(
                    "data frame {} declares {} bytes past its body",
                    ordinal,
                    end - body.len()
                )));
            }
            let record = std::str::from_utf8(&body[offset..end])
                .map_err(|_| SecretError::Protocol("data frame record is not UTF-8".to_string()))?;
            records.push(record.to_string());
            offset = end;
        }
        if offset != body.len() {
            return Err(SecretError::Protocol(format!(
                "data frame {} has {} trailing bytes",
                ordinal,
                body.len() - offset
            )));
        }

        Ok(Self { ordinal, records })
    }
}

/// Packs records, in order, into frames no larger than `max_payload`.
///
/// A frame is cut before a record whenever adding it would push the block,
/// the length list and [`FRAME_PADDING`] past the limit. A record larger than
/// the limit still travels alone in its own frame.
#[derive(Debug)]
pub struct FramePacker {
    max_payload: usize,
    next_ordinal: usize,
    block_len: usize,
    lengths_len: usize,
    records: Vec<String>,
}

impl FramePacker {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            next_ordinal: 0,
            block_len: 0,
            lengths_len: 0,
            records: Vec::new(),
        }
    }

    /// Adds a record, returning the frame it closed, if any.
    pub fn push(&mut self, record: String) -> Option<DataFrame> {
        let token_len = 1 + record.len().to_string().len();
        let prospective =
            self.block_len + record.len() + self.lengths_len + token_len + FRAME_PADDING;

        let flushed = if prospective > self.max_payload && !self.records.is_empty() {
            self.take_frame()
        } else {
            None
        };

        self.block_len += record.len();
        self.lengths_len += token_len;
        self.records.push(record);
        flushed
    }

    /// Emits the remaining records, if any.
    pub fn finish(mut self) -> Option<DataFrame> {
        if self.records.is_empty() {
            None
        } else {
            self.take_frame()
        }
    }

    pub fn frames_emitted(&self) -> usize {
        self.next_ordinal
    }

    fn take_frame(&mut self) -> Option<DataFrame> {
        let frame = DataFrame {
            ordinal: self.next_ordinal,
            records: std::mem::take(&mut self.records),
        };
        self.next_ordinal += 1;
        self.block_len = 0;
        self.lengths_len = 0;
        Some(frame)
    }

    /// Packs a whole record sequence.
    pub fn pack<I>(max_payload: usize, records: I) -> Vec<DataFrame>
    where
        I: IntoIterator<Item = String>,
    {
        let mut packer = FramePacker::new(max_payload);
        let mut frames: Vec<DataFrame> = records
            .into_iter()
            .filter_map(|record| packer.push(record))
            .collect();
        frames.extend(packer.finish());
        frames
    }
}
