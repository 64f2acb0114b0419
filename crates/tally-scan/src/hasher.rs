//! Streaming content hashing.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use blake2::{Blake2b512, Blake2s256};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use sha3::{Sha3_224, Sha3_256, Sha3_384, Sha3_512};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use tally_core::HashAlgorithm;

/// Bytes read per chunk.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Result of hashing one byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digested {
    /// Lowercase hex digest.
    pub hex: String,
    /// Number of bytes consumed.
    pub bytes: u64,
}

/// Errors while hashing a stream.
#[derive(Debug, Error)]
pub enum HashError {
    /// The source could not be read.
    #[error("Read error after {bytes} bytes: {source}")]
    Read {
        bytes: u64,
        #[source]
        source: io::Error,
    },

    /// Hashing was stopped by cancellation.
    #[error("Hashing cancelled")]
    Cancelled,
}

enum DigestState {
    Sha256(Sha256),
    Sha512(Sha512),
    Sha1(Sha1),
    Md5(Md5),
    Sha3_224(Sha3_224),
    Sha3_256(Sha3_256),
    Sha3_384(Sha3_384),
    Sha3_512(Sha3_512),
    Blake2b(Blake2b512),
    Blake2s(Blake2s256),
    Blake3(Box<blake3::Hasher>),
}

impl DigestState {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
            HashAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
            HashAlgorithm::Sha3_224 => Self::Sha3_224(Sha3_224::new()),
            HashAlgorithm::Sha3_256 => Self::Sha3_256(Sha3_256::new()),
            HashAlgorithm::Sha3_384 => Self::Sha3_384(Sha3_384::new()),
            HashAlgorithm::Sha3_512 => Self::Sha3_512(Sha3_512::new()),
            HashAlgorithm::Blake2b => Self::Blake2b(Blake2b512::new()),
            HashAlgorithm::Blake2s => Self::Blake2s(Blake2s256::new()),
            HashAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Md5(h) => h.update(data),
            Self::Sha3_224(h) => h.update(data),
            Self::Sha3_256(h) => h.update(data),
            Self::Sha3_384(h) => h.update(data),
            Self::Sha3_512(h) => h.update(data),
            Self::Blake2b(h) => h.update(data),
            Self::Blake2s(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha3_224(h) => hex::encode(h.finalize()),
            Self::Sha3_256(h) => hex::encode(h.finalize()),
            Self::Sha3_384(h) => hex::encode(h.finalize()),
            Self::Sha3_512(h) => hex::encode(h.finalize()),
            Self::Blake2b(h) => hex::encode(h.finalize()),
            Self::Blake2s(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => hex::encode(h.finalize().as_bytes()),
        }
    }
}

/// Hashes byte streams in fixed-size chunks.
///
/// Memory use is one chunk buffer regardless of the input size.
#[derive(Debug, Clone)]
pub struct StreamHasher {
    algorithm: HashAlgorithm,
    cancel: Option<CancellationToken>,
}

impl StreamHasher {
    /// Create a hasher for one algorithm.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            cancel: None,
        }
    }

    /// Stop between chunks once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Algorithm in use.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hash everything `reader` yields.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> Result<Digested, HashError> {
        let mut state = DigestState::new(self.algorithm);
        let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
        let mut bytes: u64 = 0;

        loop {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(HashError::Cancelled);
            }
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(HashError::Read { bytes, source }),
            };
            state.update(&buffer[..read]);
            bytes += read as u64;
        }

        Ok(Digested {
            hex: state.finalize_hex(),
            bytes,
        })
    }

    /// Hash a byte slice.
    pub fn hash_bytes(&self, data: &[u8]) -> String {
        let mut state = DigestState::new(self.algorithm);
        state.update(data);
        state.finalize_hex()
    }

    /// Open and hash a file on disk.
    ///
    /// Open failures are returned separately from read failures so callers
    /// can attribute them to the right step.
    pub fn hash_file(&self, path: &Path) -> Result<Result<Digested, HashError>, io::Error> {
        let file = File::open(path)?;
        Ok(self.hash_reader(file))
    }
}
