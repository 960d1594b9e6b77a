//! Streaming content digests.
//!
//! Objects are fingerprinted with MD5 (128-bit, lowercase hex). A mismatch is
//! reported through [`Verification`], never as an error: a garbled download is
//! still worth keeping.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::{Digest, Md5};

use crate::error::{Result, StoreError};

const BLOCK_SIZE: usize = 64 * 1024;

/// Digest a file by streaming it through the hasher in fixed-size blocks.
pub fn digest_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            StoreError::NotFound(format!("file {}", path.display()))
        }
        _ => StoreError::Io(e),
    })?;

    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; BLOCK_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest an in-memory buffer.
pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Outcome of comparing a file against an expected digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub expected: String,
    pub actual: String,
}

impl Verification {
    pub fn matched(&self) -> bool {
        self.expected.eq_ignore_ascii_case(&self.actual)
    }
}

/// Recompute the digest of `path` and compare it to `expected_hex`.
///
/// Only I/O failures are errors; a mismatch is returned as data.
pub fn verify<P: AsRef<Path>>(path: P, expected_hex: &str) -> Result<Verification> {
    let actual = digest_file(path)?;
    Ok(Verification {
        expected: expected_hex.trim().to_ascii_lowercase(),
        actual,
    })
}
