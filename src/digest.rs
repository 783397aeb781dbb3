//! Digest accumulators.
//!
//! The engine treats a [`Digester`] as an opaque sink: it feeds bytes in and
//! collects whatever `finalize` returns. BLAKE3 and CRC32 are provided, any
//! other message digest can be plugged in by implementing the trait.

use core::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::HashError;

/// An order-sensitive byte accumulator producing a fixed-size fingerprint.
pub trait Digester: Send {
    fn algorithm(&self) -> &'static str;

    fn update(&mut self, data: &[u8]);

    /// Digest of everything fed so far. Does not reset the accumulator.
    fn finalize(&self) -> Vec<u8>;

    /// Copies the accumulator including its state, used to start every
    /// content unit from the same nonce-seeded prototype.
    fn box_clone(&self) -> Box<dyn Digester>;
}

impl Clone for Box<dyn Digester> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// BLAKE3 digester.
///
/// Uses [`blake3`] crate to compute the hash value.
#[derive(Clone, Default)]
pub struct Blake3Digester(blake3::Hasher);

impl Blake3Digester {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Digester for Blake3Digester {
    fn algorithm(&self) -> &'static str {
        "BLAKE3"
    }

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(&self) -> Vec<u8> {
        self.0.finalize().as_bytes().to_vec()
    }

    fn box_clone(&self) -> Box<dyn Digester> {
        Box::new(self.clone())
    }
}

/// CRC32 digester, big-endian encoded.
///
/// Uses [`crc32fast`] crate to compute the hash value.
#[derive(Clone, Default)]
pub struct Crc32Digester(crc32fast::Hasher);

impl Crc32Digester {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Digester for Crc32Digester {
    fn algorithm(&self) -> &'static str {
        "CRC32"
    }

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(&self) -> Vec<u8> {
        self.0.clone().finalize().to_be_bytes().to_vec()
    }

    fn box_clone(&self) -> Box<dyn Digester> {
        Box::new(self.clone())
    }
}

/// The digest algorithms shipped with the crate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum DigestKind {
    Blake3,
    Crc32,
}

impl DigestKind {
    pub fn digester(self) -> Box<dyn Digester> {
        match self {
            DigestKind::Blake3 => Box::new(Blake3Digester::new()),
            DigestKind::Crc32 => Box::new(Crc32Digester::new()),
        }
    }

    /// One-shot digest of `data`.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut digester = self.digester();
        digester.update(data);
        digester.finalize()
    }
}

impl FromStr for DigestKind {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(DigestKind::Blake3),
            "crc32" => Ok(DigestKind::Crc32),
            other => Err(HashError::Config(format!(
                "unknown digest algorithm: {}",
                other
            ))),
        }
    }
}

impl Display for DigestKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DigestKind::Blake3 => write!(f, "BLAKE3"),
            DigestKind::Crc32 => write!(f, "CRC32"),
        }
    }
}

/// Lower-case hex rendering of a digest.
pub fn to_hex(digest: &[u8]) -> String {
    hex::encode(digest)
}
