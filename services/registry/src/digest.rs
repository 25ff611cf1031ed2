//! Content digests
//!
//! A digest is an algorithm tag plus the lowercase hex encoding of the hash of
//! some content, written `<algorithm>:<hex>`. Digests are the only identifiers
//! used for deduplicated blob storage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Digest as _;

use crate::error::{RegistryError, RegistryResult};

/// Hash algorithms accepted in digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    /// SHA-256, the canonical algorithm for new content.
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl Algorithm {
    /// The algorithm's name as it appears in a digest.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoding of a hash produced by this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }

    fn hash(&self, data: &[u8]) -> String {
        match self {
            Algorithm::Sha256 => hex::encode(sha2::Sha256::digest(data)),
            Algorithm::Sha384 => hex::encode(sha2::Sha384::digest(data)),
            Algorithm::Sha512 => hex::encode(sha2::Sha512::digest(data)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha384" => Ok(Algorithm::Sha384),
            "sha512" => Ok(Algorithm::Sha512),
            _ => Err(RegistryError::MalformedDigest {
                digest: s.to_string(),
                reason: "unsupported algorithm",
            }),
        }
    }
}

/// An algorithm-tagged content hash.
///
/// Ordering is by algorithm, then by hex, which keeps listings derived from
/// digests stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Parse a digest from its `<algorithm>:<hex>` form.
    pub fn parse(s: &str) -> RegistryResult<Self> {
        let malformed = |reason| RegistryError::MalformedDigest {
            digest: s.to_string(),
            reason,
        };

        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| malformed("missing algorithm separator"))?;
        let algorithm: Algorithm = algorithm
            .parse()
            .map_err(|_| malformed("unsupported algorithm"))?;

        if hex.len() != algorithm.hex_len() {
            return Err(malformed("wrong hex length for algorithm"));
        }
        if !hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(malformed("hex must be lowercase hexadecimal"));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// Compute the digest of some content.
    pub fn from_bytes(algorithm: Algorithm, data: &[u8]) -> Self {
        Self {
            algorithm,
            hex: algorithm.hash(data),
        }
    }

    /// Compute the canonical (SHA-256) digest of some content.
    pub fn sha256(data: &[u8]) -> Self {
        Self::from_bytes(Algorithm::Sha256, data)
    }

    /// Check that `data` hashes to this digest.
    pub fn verify(&self, data: &[u8]) -> RegistryResult<()> {
        let actual = Self::from_bytes(self.algorithm, data);
        if &actual != self {
            return Err(RegistryError::DigestMismatch {
                expected: self.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// The hash algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The hex-encoded hash.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::parse(&s).map_err(serde::de::Error::custom)
    }
}
