//! AES-CTR stream transform applied to chunk payloads.
//!
//! The keystream is positional: both ends must feed every chunk through the
//! codec exactly once and in send order. There is no integrity check, a
//! replayed or reordered chunk silently corrupts everything after it.

use aes::{Aes128, Aes192, Aes256};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ctr::cipher::{KeyIvInit, StreamCipher};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of the per-session initialization vector (one AES block).
pub const IV_LEN: usize = 16;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("encryption key must be 16, 24 or 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("iv must be {IV_LEN} bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("iv is not valid base64")]
    InvalidIvEncoding,
}

/// Pre-shared secret, provisioned to both sides out of band.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey(Vec<u8>);

impl EncryptionKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, CipherError> {
        let bytes = bytes.into();
        match bytes.len() {
            16 | 24 | 32 => Ok(Self(bytes)),
            n => Err(CipherError::InvalidKeyLength(n)),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for EncryptionKey {
    type Err = CipherError;

    /// The key is taken verbatim as the UTF-8 bytes of the string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.as_bytes().to_vec())
    }
}

// Never print key material.
impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey({} bytes)", self.0.len())
    }
}

enum Keystream {
    Aes128(Aes128Ctr),
    Aes192(Aes192Ctr),
    Aes256(Aes256Ctr),
}

pub struct StreamCipherCodec {
    keystream: Keystream,
    iv: [u8; IV_LEN],
}

impl StreamCipherCodec {
    pub fn new(key: &EncryptionKey, iv: [u8; IV_LEN]) -> Result<Self, CipherError> {
        let bytes = key.as_bytes();
        let keystream = match bytes.len() {
            16 => Keystream::Aes128(Aes128Ctr::new(bytes.into(), &iv.into())),
            24 => Keystream::Aes192(Aes192Ctr::new(bytes.into(), &iv.into())),
            32 => Keystream::Aes256(Aes256Ctr::new(bytes.into(), &iv.into())),
            n => return Err(CipherError::InvalidKeyLength(n)),
        };
        Ok(Self { keystream, iv })
    }

    /// Encoder for the offering side with a freshly drawn IV.
    pub fn with_random_iv(key: &EncryptionKey) -> Result<Self, CipherError> {
        let mut iv = [0u8; IV_LEN];
        rand::fill(&mut iv);
        Self::new(key, iv)
    }

    /// Decoder for the requesting side from the IV carried in metadata.
    pub fn from_encoded_iv(key: &EncryptionKey, encoded: &str) -> Result<Self, CipherError> {
        let raw = STANDARD
            .decode(encoded)
            .map_err(|_| CipherError::InvalidIvEncoding)?;
        let iv: [u8; IV_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CipherError::InvalidIvLength(raw.len()))?;
        Self::new(key, iv)
    }

    pub fn encoded_iv(&self) -> String {
        STANDARD.encode(self.iv)
    }

    /// XOR the next `buf.len()` keystream bytes into `buf`.
    pub fn apply(&mut self, buf: &mut [u8]) {
        match &mut self.keystream {
            Keystream::Aes128(c) => c.apply_keystream(buf),
            Keystream::Aes192(c) => c.apply_keystream(buf),
            Keystream::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

impl fmt::Debug for StreamCipherCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCipherCodec")
            .field("iv", &self.encoded_iv())
            .finish_non_exhaustive()
    }
}
