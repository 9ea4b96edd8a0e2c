//! Cipher and digest primitives backed by OpenSSL.
//!
//! - [`SymmetricKey`]: AES-256-CBC key and IV, serialized as `key || iv`
//! - [`KeyPair`] / [`seal`]: RSA-2048 with OAEP (SHA-256)
//! - [`digest`]: SHA-256

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::encrypt::{Decrypter, Encrypter};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rand::rand_bytes;
use openssl::rsa::{Padding, Rsa};
use openssl::symm::{self, Cipher};

use crate::error::{Result, SecretError};

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
const RSA_BITS: u32 = 2048;

pub fn digest(data: &[u8]) -> [u8; 32] {
    openssl::sha::sha256(data)
}

/// Lowercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Lowercase hex SHA-256 of `data`.
pub fn hex_digest(data: &[u8]) -> String {
    to_hex(&digest(data))
}

pub fn to_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn from_base64(text: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(text.trim())?)
}

#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

impl SymmetricKey {
    /// Fresh key and IV from the OpenSSL CSPRNG.
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        rand_bytes(&mut key)?;
        rand_bytes(&mut iv)?;
        Ok(Self { key, iv })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_LEN + IV_LEN);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.iv);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LEN + IV_LEN {
            return Err(SecretError::Crypto(format!(
                "symmetric key material is {} bytes, expected {}",
                bytes.len(),
                KEY_LEN + IV_LEN
            )));
        }
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        key.copy_from_slice(&bytes[..KEY_LEN]);
        iv.copy_from_slice(&bytes[KEY_LEN..]);
        Ok(Self { key, iv })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(symm::encrypt(
            Cipher::aes_256_cbc(),
            &self.key,
            Some(&self.iv),
            plaintext,
        )?)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(symm::decrypt(
            Cipher::aes_256_cbc(),
            &self.key,
            Some(&self.iv),
            ciphertext,
        )?)
    }
}

/// RSA key pair held by a Compute Node.
pub struct KeyPair {
    pkey: PKey<Private>,
}

impl KeyPair {
    pub fn generate() -> Result<Self> {
        let rsa = Rsa::generate(RSA_BITS)?;
        Ok(Self {
            pkey: PKey::from_rsa(rsa)?,
        })
    }

    /// SubjectPublicKeyInfo PEM of the public half.
    pub fn public_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pkey.public_key_to_pem()?)
    }

    /// Reverses [`seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let mut decrypter = Decrypter::new(&self.pkey)?;
        decrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
        decrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
        let mut out = vec![0u8; decrypter.decrypt_len(sealed)?];
        let len = decrypter.decrypt(sealed, &mut out)?;
        out.truncate(len);
        Ok(out)
    }
}

/// Encrypts `plaintext` for the holder of the PEM public key.
pub fn seal(public_pem: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let pkey = PKey::public_key_from_pem(public_pem)?;
    let mut encrypter = Encrypter::new(&pkey)?;
    encrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
    encrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
    let mut out = vec![0u8; encrypter.encrypt_len(plaintext)?];
    let len = encrypter.encrypt(plaintext, &mut out)?;
    out.truncate(len);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_digest_is_lowercase_sha256() {
        assert_eq!(to_hex(&[0x00, 0xab, 0x7f]), "00ab7f");
        assert_eq!(
            hex_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_symmetric_round_trip() {
        let key = SymmetricKey::generate().unwrap();
        let ciphertext = key.encrypt(b"0\t1\t2\tNA").unwrap();
        assert_ne!(ciphertext, b"0\t1\t2\tNA".to_vec());
        assert_eq!(key.decrypt(&ciphertext).unwrap(), b"0\t1\t2\tNA".to_vec());
    }

    #[test]
    fn test_symmetric_key_serialization() {
        let key = SymmetricKey::generate().unwrap();
        let bytes = key.to_bytes();
        assert_eq!(bytes.len(), KEY_LEN + IV_LEN);
        assert_eq!(SymmetricKey::from_bytes(&bytes).unwrap(), key);
        assert!(SymmetricKey::from_bytes(&bytes[1..]).is_err());
    }

    #[test]
    fn test_wrong_key_does_not_decrypt_plaintext() {
        let key = SymmetricKey::generate().unwrap();
        let other = SymmetricKey::generate().unwrap();
        let ciphertext = key.encrypt(b"private genotype values").unwrap();
        match other.decrypt(&ciphertext) {
            Ok(plain) => assert_ne!(plain, b"private genotype values".to_vec()),
            Err(_) => {}
        }
    }

    #[test]
    fn test_seal_and_open() {
        let pair = KeyPair::generate().unwrap();
        let pem = pair.public_pem().unwrap();
        let key = SymmetricKey::generate().unwrap();

        let sealed = seal(&pem, &key.to_bytes()).unwrap();
        let opened = pair.open(&sealed).unwrap();
        assert_eq!(SymmetricKey::from_bytes(&opened).unwrap(), key);
    }

    #[test]
    fn test_seal_rejects_garbage_pem() {
        assert!(seal(b"not a key", b"data").is_err());
    }

    #[test]
    fn test_base64_round_trip() {
        assert_eq!(from_base64(&to_base64(b"\x00\xffkey")).unwrap(), b"\x00\xffkey".to_vec());
    }
}
