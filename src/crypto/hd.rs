//! BIP-32 hierarchical deterministic key derivation
//!
//! `ExtendedKey` wraps the private/public extended key pair behind one type
//! so services can be handed either a signing key (sweeper, broadcaster) or
//! a watch-only key (address derivation) through the same derivation API.

use std::str::FromStr;

use bip32::{ChildNumber, Prefix, XPrv, XPub};
use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;

use crate::error::{Error, Result};
use crate::model::Network;

/// An extended key: either an xprv (full signing capability) or an xpub
/// (watch-only, non-hardened derivation only).
#[derive(Clone)]
pub enum ExtendedKey {
    Private(XPrv),
    Public(XPub),
}

impl std::fmt::Debug for ExtendedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtendedKey::Private(_) => f.write_str("ExtendedKey::Private([REDACTED])"),
            ExtendedKey::Public(_) => f.write_str("ExtendedKey::Public"),
        }
    }
}

impl ExtendedKey {
    /// Master key from a BIP-39 seed (`I = HMAC-SHA512("Bitcoin seed", seed)`)
    pub fn master_from_seed(seed: &[u8]) -> Result<Self> {
        if seed.len() < 16 || seed.len() > 64 {
            return Err(Error::InvalidSeedLength(seed.len()));
        }
        let xprv = XPrv::new(seed).map_err(|e| Error::Derivation(e.to_string()))?;
        Ok(ExtendedKey::Private(xprv))
    }

    /// Parse a serialized xprv/xpub (or tprv/tpub) string
    pub fn parse(s: &str) -> Result<Self> {
        if s.starts_with("xprv") || s.starts_with("tprv") {
            let xprv = XPrv::from_str(s)
                .map_err(|e| Error::Derivation(format!("invalid extended private key: {}", e)))?;
            Ok(ExtendedKey::Private(xprv))
        } else {
            let xpub = XPub::from_str(s)
                .map_err(|e| Error::Derivation(format!("invalid extended public key: {}", e)))?;
            Ok(ExtendedKey::Public(xpub))
        }
    }

    #[inline]
    pub fn is_private(&self) -> bool {
        matches!(self, ExtendedKey::Private(_))
    }

    /// Derive one child. Hardened children require a private parent.
    pub fn derive(&self, child: ChildNumber) -> Result<Self> {
        match self {
            ExtendedKey::Private(xprv) => {
                let child = xprv
                    .derive_child(child)
                    .map_err(|e| Error::Derivation(e.to_string()))?;
                Ok(ExtendedKey::Private(child))
            }
            ExtendedKey::Public(xpub) => {
                if child.is_hardened() {
                    return Err(Error::HardenedDerivationRequiresPrivate);
                }
                let child = xpub
                    .derive_child(child)
                    .map_err(|e| Error::Derivation(e.to_string()))?;
                Ok(ExtendedKey::Public(child))
            }
        }
    }

    /// Derive a non-hardened child by plain index
    pub fn derive_index(&self, index: u32) -> Result<Self> {
        let child =
            ChildNumber::new(index, false).map_err(|e| Error::Derivation(e.to_string()))?;
        self.derive(child)
    }

    /// Derive along a `m/a'/b'/…/n` style path
    pub fn derive_path(&self, path: &str) -> Result<Self> {
        let mut key = self.clone();
        for child in parse_path(path)? {
            key = key.derive(child)?;
        }
        Ok(key)
    }

    /// Strip private material, leaving a watch-only key
    pub fn neuter(&self) -> Self {
        match self {
            ExtendedKey::Private(xprv) => ExtendedKey::Public(xprv.public_key()),
            ExtendedKey::Public(xpub) => ExtendedKey::Public(xpub.clone()),
        }
    }

    /// The secp256k1 signing key. Fails on a watch-only key.
    pub fn signing_key(&self) -> Result<&SigningKey> {
        match self {
            ExtendedKey::Private(xprv) => Ok(xprv.private_key()),
            ExtendedKey::Public(_) => Err(Error::PrivateKeyRequired),
        }
    }

    /// The secp256k1 verifying key
    pub fn verifying_key(&self) -> VerifyingKey {
        match self {
            ExtendedKey::Private(xprv) => *xprv.public_key().public_key(),
            ExtendedKey::Public(xpub) => *xpub.public_key(),
        }
    }

    /// 33-byte compressed SEC1 point
    pub fn public_key_compressed(&self) -> [u8; 33] {
        let point = self.verifying_key().to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// 65-byte uncompressed SEC1 point (leading 0x04)
    pub fn public_key_uncompressed(&self) -> [u8; 65] {
        let point = self.verifying_key().to_encoded_point(false);
        let mut out = [0u8; 65];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Serialize as xprv/xpub (tprv/tpub on testnet)
    pub fn encode(&self, network: Network) -> String {
        match self {
            ExtendedKey::Private(xprv) => {
                let prefix = match network {
                    Network::Mainnet => Prefix::XPRV,
                    Network::Testnet => Prefix::TPRV,
                };
                xprv.to_string(prefix).as_str().to_owned()
            }
            ExtendedKey::Public(xpub) => {
                let prefix = match network {
                    Network::Mainnet => Prefix::XPUB,
                    Network::Testnet => Prefix::TPUB,
                };
                xpub.to_string(prefix)
            }
        }
    }
}

/// Parse a derivation path into child numbers.
///
/// Accepts `m/44'/60'/0'/0/0` with `'` or `h` marking hardened segments.
/// An empty path (or bare `m`) yields no segments.
pub fn parse_path(path: &str) -> Result<Vec<ChildNumber>> {
    let trimmed = path.trim();
    let rest = trimmed.strip_prefix("m/").unwrap_or(match trimmed {
        "m" | "" => "",
        other => other,
    });

    if rest.is_empty() {
        return Ok(Vec::new());
    }

    let mut children = Vec::new();
    for segment in rest.split('/') {
        let (digits, hardened) = match segment.strip_suffix('\'').or(segment.strip_suffix('h')) {
            Some(d) => (d, true),
            None => (segment, false),
        };
        let index: u32 = digits
            .parse()
            .map_err(|_| Error::InvalidPath(path.to_string()))?;
        let child =
            ChildNumber::new(index, hardened).map_err(|_| Error::InvalidPath(path.to_string()))?;
        children.push(child);
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_seed() -> Vec<u8> {
        // Seed of the "abandon … about" vector mnemonic
        hex::decode(
            "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc1\
             9a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e4",
        )
        .unwrap()
    }

    #[test]
    fn test_master_rejects_bad_seed_length() {
        assert!(matches!(
            ExtendedKey::master_from_seed(&[0u8; 15]),
            Err(Error::InvalidSeedLength(15))
        ));
        assert!(matches!(
            ExtendedKey::master_from_seed(&[0u8; 65]),
            Err(Error::InvalidSeedLength(65))
        ));
    }

    #[test]
    fn test_parse_path_variants() {
        assert!(parse_path("m").unwrap().is_empty());
        assert!(parse_path("").unwrap().is_empty());

        let path = parse_path("m/44'/60h/0'/0/5").unwrap();
        assert_eq!(path.len(), 5);
        assert!(path[0].is_hardened());
        assert_eq!(path[0].index(), 44);
        assert!(path[1].is_hardened());
        assert!(!path[3].is_hardened());
        assert_eq!(path[4].index(), 5);
    }

    #[test]
    fn test_parse_path_rejects_garbage() {
        assert!(parse_path("m/44'/abc").is_err());
        assert!(parse_path("m//0").is_err());
        assert!(parse_path("m/2147483648").is_err());
    }

    #[test]
    fn test_neuter_commutes_with_nonhardened_derive() {
        let master = ExtendedKey::master_from_seed(&test_seed()).unwrap();
        let account = master.derive_path("m/44'/60'/0'").unwrap();

        for i in [0u32, 1, 7, 1000] {
            let via_private = account.derive_index(0).unwrap().derive_index(i).unwrap();
            let via_public = account
                .neuter()
                .derive_index(0)
                .unwrap()
                .derive_index(i)
                .unwrap();
            assert_eq!(
                via_private.public_key_compressed(),
                via_public.public_key_compressed()
            );
        }
    }

    #[test]
    fn test_hardened_derivation_requires_private() {
        let master = ExtendedKey::master_from_seed(&test_seed()).unwrap();
        let xpub = master.neuter();
        let hardened = ChildNumber::new(44, true).unwrap();
        assert!(matches!(
            xpub.derive(hardened),
            Err(Error::HardenedDerivationRequiresPrivate)
        ));
    }

    #[test]
    fn test_signing_key_requires_private() {
        let master = ExtendedKey::master_from_seed(&test_seed()).unwrap();
        assert!(master.signing_key().is_ok());
        assert!(matches!(
            master.neuter().signing_key(),
            Err(Error::PrivateKeyRequired)
        ));
    }

    #[test]
    fn test_encode_roundtrip() {
        let master = ExtendedKey::master_from_seed(&test_seed()).unwrap();
        let xprv_str = master.encode(Network::Mainnet);
        assert!(xprv_str.starts_with("xprv"));

        let xpub_str = master.neuter().encode(Network::Mainnet);
        assert!(xpub_str.starts_with("xpub"));

        let parsed = ExtendedKey::parse(&xpub_str).unwrap();
        assert!(!parsed.is_private());
        assert_eq!(
            parsed.public_key_compressed(),
            master.public_key_compressed()
        );
    }
}
