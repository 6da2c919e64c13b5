//! DTLS pre-shared key

use crate::constants::MAX_PSK_LEN;
use crate::error::{ZipError, ZipResult};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use std::fmt;

/// Key used by the Z/IP Gateway reference applications when none is configured
pub const DEFAULT_PSK: [u8; 16] = [
    0x12, 0x34, 0x56, 0x78, 0x90, 0x12, 0x34, 0x56, 0x78, 0x90, 0x12, 0x34, 0x56, 0x78, 0x90, 0xAA,
];

/// Pre-shared key for DTLS sessions
///
/// The key length is bounded by RFC 4279 to 1..=64 bytes. The key material is
/// never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ByteBuf", into = "ByteBuf")]
pub struct Psk(Vec<u8>);

impl Psk {
    /// Create a key from raw bytes
    ///
    /// # Errors
    /// Returns `ZipError::Config` if the key is empty or longer than 64 bytes
    pub fn new(key: impl Into<Vec<u8>>) -> ZipResult<Self> {
        let key = key.into();
        if key.is_empty() || key.len() > MAX_PSK_LEN {
            return Err(ZipError::Config(format!(
                "PSK length must be 1..={} bytes, got {}",
                MAX_PSK_LEN,
                key.len()
            )));
        }
        Ok(Self(key))
    }

    /// Parse a key from a hex string such as `"123456789012345678901234567890AA"`
    pub fn from_hex(hex: &str) -> ZipResult<Self> {
        let hex = hex.trim();
        if hex.len() % 2 != 0 {
            return Err(ZipError::Config(format!(
                "PSK hex string must have an even number of digits, got {}",
                hex.len()
            )));
        }

        let key = hex
            .as_bytes()
            .chunks(2)
            .map(|pair| {
                let digits = std::str::from_utf8(pair)
                    .map_err(|_| ZipError::Config("PSK hex string is not ASCII".to_string()))?;
                u8::from_str_radix(digits, 16)
                    .map_err(|e| ZipError::Config(format!("Invalid PSK hex digits {:?}: {}", digits, e)))
            })
            .collect::<ZipResult<Vec<u8>>>()?;

        Self::new(key)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Psk {
    fn default() -> Self {
        Self(DEFAULT_PSK.to_vec())
    }
}

impl fmt::Debug for Psk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Psk({} bytes)", self.0.len())
    }
}

impl TryFrom<ByteBuf> for Psk {
    type Error = ZipError;

    fn try_from(buf: ByteBuf) -> ZipResult<Self> {
        Self::new(buf.into_vec())
    }
}

impl From<Psk> for ByteBuf {
    fn from(psk: Psk) -> Self {
        ByteBuf::from(psk.0)
    }
}
