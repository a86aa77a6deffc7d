//! Centralized hashing utilities for PAR3 operations
//!
//! Block checksums and the running packet check are CRC-64 (GO-ISO
//! parameters); packet digests are BLAKE3 truncated to 16 bytes.

use crc_fast::{CrcAlgorithm, Digest};
use std::io::{self, Read};

/// Algorithm used for every CRC-64 in the recovery set
pub const CRC64: CrcAlgorithm = CrcAlgorithm::Crc64GoIso;

/// Length of a packet digest in bytes
pub const DIGEST_LEN: usize = 16;

/// Read buffer for streaming digests (1MB)
const BUFFER_SIZE: usize = 1024 * 1024;

/// Compute CRC-64 of data in one shot
#[inline]
pub fn crc64(data: &[u8]) -> u64 {
    crc_fast::checksum(CRC64, data)
}

/// Create a CRC-64 accumulator for data that arrives in pieces
#[inline]
pub fn new_crc64() -> Digest {
    Digest::new(CRC64)
}

/// Current value of an accumulator without consuming it
#[inline]
pub fn crc64_value(digest: &Digest) -> u64 {
    digest.clone().finalize()
}

/// BLAKE3 of the concatenated parts, truncated to 16 bytes
pub fn packet_digest(parts: &[&[u8]]) -> [u8; DIGEST_LEN] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&hasher.finalize().as_bytes()[..DIGEST_LEN]);
    digest
}

/// Digest of the next `len` bytes of `reader`, read in bounded chunks
pub fn packet_digest_reader<R: Read>(reader: &mut R, len: u64) -> io::Result<[u8; DIGEST_LEN]> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; BUFFER_SIZE.min(len as usize)];
    let mut remaining = len;
    while remaining > 0 {
        let chunk = (remaining as usize).min(buffer.len());
        reader.read_exact(&mut buffer[..chunk])?;
        hasher.update(&buffer[..chunk]);
        remaining -= chunk as u64;
    }
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&hasher.finalize().as_bytes()[..DIGEST_LEN]);
    Ok(digest)
}
