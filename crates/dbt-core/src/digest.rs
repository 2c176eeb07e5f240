// SPDX-License-Identifier: MIT OR Apache-2.0
//! Hex-encoded content digests.
//!
//! SHA-256 is the only digest in the verification chain. SHA-1 and MD5 exist
//! solely so the repository server can honor client-supplied
//! `X-Checksum-Sha1` / `X-Checksum-Md5` upload headers.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io::{self, Read};
use std::path::Path;

/// Buffer size for streaming file digests.
const READ_BUF: usize = 64 * 1024;

/// SHA-256 of a byte slice, lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-1 of a byte slice, lowercase hex.
pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// MD5 of a byte slice, lowercase hex.
pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// SHA-256 of a file's full content, lowercase hex.
///
/// Streams the file so multi-hundred-megabyte tool binaries do not get
/// buffered in memory.
pub fn sha256_hex_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
