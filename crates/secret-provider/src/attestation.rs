//! Compute Node attestation.

use secret_common::crypto::to_hex;
use secret_common::{Result, SecretError};

/// Decides whether a Compute Node may receive key material.
///
/// `public_key_hash` is the SHA-256 of the PEM public key the node sent. A
/// verifier must tie the evidence to that key so keys are only sealed to
/// the attested node.
pub trait EvidenceVerifier: Send + Sync {
    fn verify_evidence(&self, evidence: &[u8], public_key_hash: &[u8; 32]) -> Result<()>;
}

/// Development verifier: the evidence must be the lowercase hex digest of
/// the node's public key. It proves key possession, not isolation.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyDigestVerifier;

impl EvidenceVerifier for KeyDigestVerifier {
    fn verify_evidence(&self, evidence: &[u8], public_key_hash: &[u8; 32]) -> Result<()> {
        let expected = to_hex(public_key_hash);
        let evidence = std::str::from_utf8(evidence)
            .map_err(|_| SecretError::Attestation("evidence is not UTF-8".to_string()))?;

        if evidence.trim().eq_ignore_ascii_case(&expected) {
            Ok(())
        } else {
            Err(SecretError::Attestation(
                "evidence does not match the public key".to_string(),
            ))
        }
    }
}
