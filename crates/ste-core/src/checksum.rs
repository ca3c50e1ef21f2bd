//! Checksum utilities.
//!
//! Content-MD5 is the integrity primitive the wire format and the
//! check-md5 mode are defined against: `md5_file` is what the Worker Pool's
//! commit step and the Resume Controller compare. `blake3`/`xxhash3` are
//! kept for internal resume/dedup heuristics where the wire format doesn't
//! dictate MD5.

use eyre::{Context, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub enum ChecksumType {
    Blake3,
    XxHash3,
    Md5,
}

impl Default for ChecksumType {
    fn default() -> Self {
        Self::Md5
    }
}

/// check-md5 mode, applied once a transfer's full content has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMd5Mode {
    NoCheck,
    #[default]
    LogOnly,
    FailIfDifferent,
}

const READ_BUF: usize = 256 * 1024;

/// Compute the MD5 digest of a byte slice (16 bytes).
pub fn md5_bytes(data: &[u8]) -> [u8; 16] {
    md5::compute(data).0
}

/// Compute the MD5 digest of a whole file (16 bytes).
pub fn md5_file(path: &Path) -> Result<[u8; 16]> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut ctx = md5::Context::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(ctx.compute().0)
}

/// Hash a whole file with the given algorithm, for internal (non-wire) use.
pub fn hash_file(path: &Path, ty: ChecksumType) -> Result<Vec<u8>> {
    match ty {
        ChecksumType::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
            let mut buf = vec![0u8; READ_BUF];
            loop {
                let n = f.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hasher.finalize().as_bytes().to_vec())
        }
        ChecksumType::XxHash3 => {
            let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
            let mut buf = vec![0u8; READ_BUF];
            let mut state = xxhash_rust::xxh3::Xxh3::new();
            loop {
                let n = f.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                state.update(&buf[..n]);
            }
            Ok(state.digest().to_be_bytes().to_vec())
        }
        ChecksumType::Md5 => Ok(md5_file(path)?.to_vec()),
    }
}

/// Compute a partial hash of the first and last `bytes` of the file using BLAKE3.
/// If the file is smaller than `2*bytes`, the whole file is hashed.
/// Used by the Resume Controller as a cheap pre-check before a full MD5 pass.
pub fn partial_hash_first_last(path: &Path, bytes: usize) -> Result<Vec<u8>> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = f.metadata()?.len();
    let mut hasher = blake3::Hasher::new();
    if len as usize <= bytes * 2 {
        let mut buf = vec![0u8; READ_BUF];
        loop {
            let n = f.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    } else {
        let mut first = vec![0u8; bytes];
        f.read_exact(&mut first)?;
        hasher.update(b"FIRST");
        hasher.update(&first);

        f.seek(SeekFrom::End(-(bytes as i64)))?;
        let mut last = vec![0u8; bytes];
        f.read_exact(&mut last)?;
        hasher.update(b"LAST");
        hasher.update(&last);
        hasher.update(&len.to_le_bytes());
    }
    Ok(hasher.finalize().as_bytes().to_vec())
}
