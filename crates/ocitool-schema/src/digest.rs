//! Content digests of the form `<algorithm>:<encoded>`.

use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const SHA256: &str = "sha256";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    #[error("invalid digest {0:?}: expected <algorithm>:<hex>")]
    Malformed(String),
    #[error("unsupported digest algorithm {0:?}")]
    UnsupportedAlgorithm(String),
    #[error("invalid {algorithm} digest {digest:?}: {reason}")]
    InvalidEncoding {
        algorithm: String,
        digest: String,
        reason: &'static str,
    },
}

/// A parsed digest. Both parts are restricted to characters that are safe
/// to use as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest {
    algorithm: String,
    encoded: String,
}

impl Digest {
    pub fn sha256_hex(encoded: impl Into<String>) -> Self {
        Self {
            algorithm: SHA256.to_owned(),
            encoded: encoded.into(),
        }
    }

    /// sha256 digest of an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self::sha256_hex(hex::encode(Sha256::digest(data)))
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Whether this tool can recompute digests of this algorithm.
    pub fn is_supported(&self) -> bool {
        self.algorithm == SHA256
    }

    /// Stricter check than parsing: the algorithm is supported and the
    /// encoded part has the length and alphabet that algorithm produces.
    pub fn verify_encoding(&self) -> Result<(), DigestError> {
        if !self.is_supported() {
            return Err(DigestError::UnsupportedAlgorithm(self.algorithm.clone()));
        }
        if self.encoded.len() != 64 {
            return Err(DigestError::InvalidEncoding {
                algorithm: self.algorithm.clone(),
                digest: self.to_string(),
                reason: "expected 64 hex characters",
            });
        }
        if !self
            .encoded
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(DigestError::InvalidEncoding {
                algorithm: self.algorithm.clone(),
                digest: self.to_string(),
                reason: "expected lowercase hex",
            });
        }
        Ok(())
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| DigestError::Malformed(s.to_owned()))?;
        if !valid_algorithm(algorithm) || !valid_encoded(encoded) {
            return Err(DigestError::Malformed(s.to_owned()));
        }
        Ok(Self {
            algorithm: algorithm.to_owned(),
            encoded: encoded.to_owned(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

// algorithm := [a-z0-9]+ ([+._-] [a-z0-9]+)*
fn valid_algorithm(s: &str) -> bool {
    let mut prev_sep = true;
    for b in s.bytes() {
        match b {
            b'a'..=b'z' | b'0'..=b'9' => prev_sep = false,
            b'+' | b'.' | b'_' | b'-' => {
                if prev_sep {
                    return false;
                }
                prev_sep = true;
            }
            _ => return false,
        }
    }
    !prev_sep
}

// encoded := [a-zA-Z0-9=_-]+
fn valid_encoded(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'=' | b'_' | b'-'))
}

/// Incremental sha256 computation that also counts bytes.
#[derive(Default)]
pub struct Digester {
    hasher: Sha256,
    written: u64,
}

impl Digester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.written += chunk.len() as u64;
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn finish(self) -> (Digest, u64) {
        let encoded = hex::encode(self.hasher.finalize());
        (Digest::sha256_hex(encoded), self.written)
    }
}

impl std::io::Write for Digester {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
