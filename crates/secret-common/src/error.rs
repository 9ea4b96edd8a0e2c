use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecretError {
    /// Bad or missing length header, oversized frame, short read mid-payload.
    #[error("Frame error: {0}")]
    Frame(String),

    /// Unknown message type, unparsable sender, malformed payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input file contains no records: {0}")]
    EmptyInput(String),

    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Attestation failed: {0}")]
    Attestation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SecretError {
    /// Whether this error only concerns the connection it happened on.
    ///
    /// Framing and protocol errors close the offending connection and the
    /// server keeps serving everybody else.
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            SecretError::Frame(_) | SecretError::Protocol(_) | SecretError::Connection(_)
        )
    }
}

impl From<openssl::error::ErrorStack> for SecretError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        SecretError::Crypto(err.to_string())
    }
}

impl From<base64::DecodeError> for SecretError {
    fn from(err: base64::DecodeError) -> Self {
        SecretError::Protocol(format!("invalid base64 payload: {}", err))
    }
}

impl From<std::num::ParseIntError> for SecretError {
    fn from(err: std::num::ParseIntError) -> Self {
        SecretError::Protocol(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SecretError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_local_errors() {
        assert!(SecretError::Frame("x".into()).is_connection_local());
        assert!(SecretError::Protocol("x".into()).is_connection_local());
        assert!(!SecretError::Config("x".into()).is_connection_local());
        assert!(!SecretError::EmptyInput("a.tsv".into()).is_connection_local());
    }

    #[test]
    fn test_malformed_record_display() {
        let err = SecretError::MalformedRecord {
            line: 7,
            reason: "expected at least 3 fields".into(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed record at line 7: expected at least 3 fields"
        );
    }
}
