//! Supported digest algorithms.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::error::CatalogError;

/// Digest algorithm used to hash every file in a run.
///
/// Names parse case-insensitively and accept the common spellings
/// (`sha256`, `SHA-256`, `sha3_256`, ...). The canonical name is what
/// [`Display`](std::fmt::Display) prints and what serde writes.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum HashAlgorithm {
    #[default]
    #[serde(rename = "sha256")]
    #[strum(to_string = "sha256", serialize = "sha-256")]
    Sha256,

    #[serde(rename = "sha512")]
    #[strum(to_string = "sha512", serialize = "sha-512")]
    Sha512,

    #[serde(rename = "sha1")]
    #[strum(to_string = "sha1", serialize = "sha-1")]
    Sha1,

    #[serde(rename = "md5")]
    #[strum(to_string = "md5")]
    Md5,

    #[serde(rename = "sha3-224")]
    #[strum(to_string = "sha3-224", serialize = "sha3_224")]
    Sha3_224,

    #[serde(rename = "sha3-256")]
    #[strum(to_string = "sha3-256", serialize = "sha3_256")]
    Sha3_256,

    #[serde(rename = "sha3-384")]
    #[strum(to_string = "sha3-384", serialize = "sha3_384")]
    Sha3_384,

    #[serde(rename = "sha3-512")]
    #[strum(to_string = "sha3-512", serialize = "sha3_512")]
    Sha3_512,

    #[serde(rename = "blake2b")]
    #[strum(to_string = "blake2b", serialize = "blake2b-512")]
    Blake2b,

    #[serde(rename = "blake2s")]
    #[strum(to_string = "blake2s", serialize = "blake2s-256")]
    Blake2s,

    #[serde(rename = "blake3")]
    #[strum(to_string = "blake3")]
    Blake3,
}

impl HashAlgorithm {
    /// Parse an algorithm name, rejecting anything outside the supported set.
    pub fn from_name(name: &str) -> Result<Self, CatalogError> {
        Self::from_str(name.trim()).map_err(|_| CatalogError::UnsupportedAlgorithm {
            name: name.to_string(),
        })
    }

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
            Self::Sha3_224 => "sha3-224",
            Self::Sha3_256 => "sha3-256",
            Self::Sha3_384 => "sha3-384",
            Self::Sha3_512 => "sha3-512",
            Self::Blake2b => "blake2b",
            Self::Blake2s => "blake2s",
            Self::Blake3 => "blake3",
        }
    }

    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha3_224 => 28,
            Self::Sha256 | Self::Sha3_256 | Self::Blake2s | Self::Blake3 => 32,
            Self::Sha3_384 => 48,
            Self::Sha512 | Self::Sha3_512 | Self::Blake2b => 64,
        }
    }

    /// Length of the hex string produced for this algorithm.
    pub fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// All supported algorithms, default first.
    pub fn all() -> Vec<HashAlgorithm> {
        Self::iter().collect()
    }
}
