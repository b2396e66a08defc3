//! Hashing helpers: SHA-256, Keccak-256, HASH160, EIP-55

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// SHA-256
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Keccak-256 (the pre-NIST variant Ethereum uses)
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// RIPEMD160(SHA256(data)), the Bitcoin public-key hash
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(Sha256::digest(data)));
    out
}

/// Apply the EIP-55 mixed-case checksum to a 40-char hex address.
///
/// Accepts upper/lower/mixed input with or without the `0x` prefix and
/// returns the bare checksummed hex. The encoding is idempotent.
pub fn eip55_checksum(hex20: &str) -> String {
    let lower = hex20.trim_start_matches("0x").to_ascii_lowercase();
    let hash = keccak256(lower.as_bytes());

    lower
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if nibble >= 8 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect()
}
