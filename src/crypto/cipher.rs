//! AES-256-GCM authenticated encryption and the scrypt KDF

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::{rngs::OsRng, RngCore};

use crate::error::{Error, Result};

/// GCM nonce size in bytes
pub const NONCE_SIZE: usize = 12;

/// Standard scrypt parameters for keystore encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScryptParams {
    pub n: u64,
    pub r: u32,
    pub p: u32,
    pub dklen: usize,
}

impl ScryptParams {
    /// Production parameters: N=262144, r=8, p=1, dkLen=32
    pub const STANDARD: ScryptParams = ScryptParams {
        n: 262144,
        r: 8,
        p: 1,
        dklen: 32,
    };

    /// Cheap parameters for tests. Never use for real keystores.
    pub const LIGHT: ScryptParams = ScryptParams {
        n: 4096,
        r: 8,
        p: 1,
        dklen: 32,
    };
}

/// Derive a key with scrypt. `params.n` must be a power of two.
pub fn scrypt_key(password: &[u8], salt: &[u8], params: ScryptParams) -> Result<Vec<u8>> {
    let log_n = params.n.trailing_zeros() as u8;
    if params.n == 0 || params.n != (1u64 << log_n) {
        return Err(Error::Config(format!("scrypt N={} is not a power of two", params.n)));
    }
    let scrypt_params = scrypt::Params::new(log_n, params.r, params.p, params.dklen)
        .map_err(|e| Error::Config(format!("invalid scrypt params: {}", e)))?;

    let mut out = vec![0u8; params.dklen];
    scrypt::scrypt(password, salt, &scrypt_params, &mut out)
        .map_err(|e| Error::Config(format!("scrypt failed: {}", e)))?;
    Ok(out)
}

/// Encrypt with a random nonce; output is `nonce(12) || ciphertext || tag(16)`
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = seal(key, &nonce, plaintext)?;
    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`encrypt`]; fails on tag mismatch
pub fn decrypt(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_SIZE {
        return Err(Error::WrongPasswordOrCorrupt);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
    open(key, nonce.try_into().expect("split at NONCE_SIZE"), ciphertext)
}

/// Seal with an explicit nonce; output is `ciphertext || tag(16)`
pub fn seal(key: &[u8; 32], nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).expect("32-byte key");
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| Error::WrongPasswordOrCorrupt)
}

/// Open a `ciphertext || tag` payload sealed with [`seal`]
pub fn open(key: &[u8; 32], nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).expect("32-byte key");
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::WrongPasswordOrCorrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_roundtrip() {
        let key = [7u8; 32];
        let sealed = encrypt(&key, b"secret payload").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 14 + 16);
        assert_eq!(decrypt(&key, &sealed).unwrap(), b"secret payload");
    }

    #[test]
    fn test_decrypt_wrong_key_fails() {
        let sealed = encrypt(&[7u8; 32], b"secret payload").unwrap();
        assert!(decrypt(&[8u8; 32], &sealed).is_err());
    }

    #[test]
    fn test_decrypt_tampered_fails() {
        let key = [7u8; 32];
        let mut sealed = encrypt(&key, b"secret payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(decrypt(&key, &sealed).is_err());
    }

    #[test]
    fn test_scrypt_known_vector() {
        // RFC 7914 test vector #2
        let key = scrypt_key(
            b"password",
            b"NaCl",
            ScryptParams {
                n: 1024,
                r: 8,
                p: 16,
                dklen: 64,
            },
        )
        .unwrap();
        assert_eq!(
            hex::encode(&key),
            "fdbabe1c9d3472007856e7190d01e9fe7c6ad7cbc8237830e77376634b373162\
             2eaf30d92e22a3886ff109279d9830dac727afb94a83ee6d8360cbdfa2cc0640"
        );
    }

    #[test]
    fn test_scrypt_rejects_non_power_of_two() {
        assert!(scrypt_key(b"pw", b"salt", ScryptParams { n: 1000, r: 8, p: 1, dklen: 32 }).is_err());
    }
}
