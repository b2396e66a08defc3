//! Encrypted keystore envelope for the master mnemonic
//!
//! The on-disk format follows the Ethereum keystore V3 layout but stores the
//! BIP-39 mnemonic instead of a raw private key, so the server and the
//! offline signer share wallet files. Encryption is scrypt + AES-256-GCM
//! with an additional `SHA-256(derivedKey || ciphertext)` MAC kept for
//! compatibility with existing files; the GCM tag authenticates as well.

use std::path::Path;

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::cipher::{self, ScryptParams, NONCE_SIZE};
use crate::crypto::hash::sha256;
use crate::error::{Error, Result};

/// Encrypted keystore envelope (version 3)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keystore {
    pub version: u32,
    pub id: String,
    pub crypto: CryptoEnvelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoEnvelope {
    pub cipher: String,
    pub ciphertext: String,
    pub cipherparams: CipherParams,
    pub kdf: String,
    pub kdfparams: KdfParams,
    pub mac: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherParams {
    pub iv: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub dklen: usize,
    pub n: u64,
    pub r: u32,
    pub p: u32,
    pub salt: String,
}

impl Keystore {
    /// Encrypt a mnemonic with the production scrypt parameters
    pub fn encrypt_mnemonic(mnemonic: &str, password: &str) -> Result<Self> {
        Self::encrypt_mnemonic_with_params(mnemonic, password, ScryptParams::STANDARD)
    }

    /// Encrypt with explicit scrypt parameters (tests use light ones)
    pub fn encrypt_mnemonic_with_params(
        mnemonic: &str,
        password: &str,
        params: ScryptParams,
    ) -> Result<Self> {
        let mut salt = [0u8; 32];
        OsRng.fill_bytes(&mut salt);

        let derived = Zeroizing::new(cipher::scrypt_key(password.as_bytes(), &salt, params)?);
        let key: [u8; 32] = derived[..]
            .try_into()
            .map_err(|_| Error::Config("scrypt dklen must be 32".into()))?;

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher::seal(&key, &nonce, mnemonic.as_bytes())?;

        let mut mac_input = Vec::with_capacity(derived.len() + ciphertext.len());
        mac_input.extend_from_slice(&derived);
        mac_input.extend_from_slice(&ciphertext);
        let mac = sha256(&mac_input);

        Ok(Keystore {
            version: 3,
            id: Uuid::new_v4().to_string(),
            crypto: CryptoEnvelope {
                cipher: "aes-256-gcm".into(),
                ciphertext: hex::encode(&ciphertext),
                cipherparams: CipherParams {
                    iv: hex::encode(nonce),
                },
                kdf: "scrypt".into(),
                kdfparams: KdfParams {
                    dklen: params.dklen,
                    n: params.n,
                    r: params.r,
                    p: params.p,
                    salt: hex::encode(salt),
                },
                mac: hex::encode(mac),
            },
        })
    }

    /// Decrypt the mnemonic.
    ///
    /// MAC mismatch and GCM tag failure are deliberately indistinguishable
    /// to the caller.
    pub fn decrypt_mnemonic(&self, password: &str) -> Result<Zeroizing<String>> {
        if self.crypto.cipher != "aes-256-gcm" {
            return Err(Error::MalformedEnvelope(format!(
                "unsupported cipher '{}'",
                self.crypto.cipher
            )));
        }
        if self.crypto.kdf != "scrypt" {
            return Err(Error::MalformedEnvelope(format!(
                "unsupported kdf '{}'",
                self.crypto.kdf
            )));
        }
        if self.crypto.kdfparams.dklen != 32 {
            return Err(Error::MalformedEnvelope("dklen must be 32".into()));
        }

        let salt = decode_hex_field(&self.crypto.kdfparams.salt, "salt")?;
        let iv = decode_hex_field(&self.crypto.cipherparams.iv, "iv")?;
        let ciphertext = decode_hex_field(&self.crypto.ciphertext, "ciphertext")?;
        let mac = decode_hex_field(&self.crypto.mac, "mac")?;

        let nonce: [u8; NONCE_SIZE] = iv[..]
            .try_into()
            .map_err(|_| Error::MalformedEnvelope("iv must be 12 bytes".into()))?;

        let params = ScryptParams {
            n: self.crypto.kdfparams.n,
            r: self.crypto.kdfparams.r,
            p: self.crypto.kdfparams.p,
            dklen: self.crypto.kdfparams.dklen,
        };
        let derived = Zeroizing::new(cipher::scrypt_key(password.as_bytes(), &salt, params)?);

        let mut mac_input = Vec::with_capacity(derived.len() + ciphertext.len());
        mac_input.extend_from_slice(&derived);
        mac_input.extend_from_slice(&ciphertext);
        if !constant_time_eq(&sha256(&mac_input), &mac) {
            return Err(Error::WrongPasswordOrCorrupt);
        }

        let key: [u8; 32] = derived[..].try_into().expect("dklen checked above");
        let plaintext = Zeroizing::new(cipher::open(&key, &nonce, &ciphertext)?);

        String::from_utf8(plaintext.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| Error::WrongPasswordOrCorrupt)
    }

    /// Write the envelope to `path` (owner-only permissions, temp + rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");

        {
            use std::io::Write;
            let mut options = std::fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp)?;
            file.write_all(data.as_bytes())?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load an envelope from disk
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| Error::MalformedEnvelope(e.to_string()))
    }
}

fn decode_hex_field(value: &str, field: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|_| Error::MalformedEnvelope(format!("invalid hex in {}", field)))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_roundtrip_light_params() {
        let ks =
            Keystore::encrypt_mnemonic_with_params(TEST_MNEMONIC, "secure-password", ScryptParams::LIGHT)
                .unwrap();
        assert_eq!(ks.version, 3);
        assert_eq!(ks.crypto.cipher, "aes-256-gcm");
        assert_eq!(ks.crypto.kdf, "scrypt");

        let decrypted = ks.decrypt_mnemonic("secure-password").unwrap();
        assert_eq!(&*decrypted, TEST_MNEMONIC);
    }

    #[test]
    fn test_wrong_password_fails() {
        let ks =
            Keystore::encrypt_mnemonic_with_params(TEST_MNEMONIC, "secure-password", ScryptParams::LIGHT)
                .unwrap();
        assert!(matches!(
            ks.decrypt_mnemonic("wrong-password"),
            Err(Error::WrongPasswordOrCorrupt)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut ks =
            Keystore::encrypt_mnemonic_with_params(TEST_MNEMONIC, "secure-password", ScryptParams::LIGHT)
                .unwrap();
        let mut raw = hex::decode(&ks.crypto.ciphertext).unwrap();
        raw[0] ^= 0x01;
        ks.crypto.ciphertext = hex::encode(raw);
        assert!(matches!(
            ks.decrypt_mnemonic("secure-password"),
            Err(Error::WrongPasswordOrCorrupt)
        ));
    }

    #[test]
    fn test_standard_params_roundtrip() {
        // Production parameters; slow but exercises the real configuration.
        let ks = Keystore::encrypt_mnemonic(TEST_MNEMONIC, "secure-password").unwrap();
        assert_eq!(ks.crypto.kdfparams.n, 262144);
        assert_eq!(ks.crypto.kdfparams.r, 8);
        assert_eq!(ks.crypto.kdfparams.p, 1);
        let decrypted = ks.decrypt_mnemonic("secure-password").unwrap();
        assert_eq!(&*decrypted, TEST_MNEMONIC);
    }

    #[test]
    fn test_save_load() {
        let dir = std::env::temp_dir().join(format!("keystore-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("wallet.json");

        let ks =
            Keystore::encrypt_mnemonic_with_params(TEST_MNEMONIC, "secure-password", ScryptParams::LIGHT)
                .unwrap();
        ks.save(&path).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let loaded = Keystore::load(&path).unwrap();
        assert_eq!(loaded.id, ks.id);
        let decrypted = loaded.decrypt_mnemonic("secure-password").unwrap();
        assert_eq!(&*decrypted, TEST_MNEMONIC);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_malformed_envelope() {
        let mut ks =
            Keystore::encrypt_mnemonic_with_params(TEST_MNEMONIC, "pw", ScryptParams::LIGHT).unwrap();
        ks.crypto.mac = "zz".into();
        assert!(matches!(
            ks.decrypt_mnemonic("pw"),
            Err(Error::MalformedEnvelope(_))
        ));
    }
}
