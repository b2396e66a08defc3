//! Ethereum address encoding (Keccak-256 + EIP-55)

use crate::crypto::hash::{eip55_checksum, keccak256};

/// Encode an uncompressed public key as a 0x-prefixed EIP-55 address.
///
/// The leading 0x04 SEC1 byte is dropped before hashing; the address is the
/// last 20 bytes of the Keccak-256 digest.
pub fn pubkey_to_address(uncompressed: &[u8; 65]) -> String {
    let hash = keccak256(&uncompressed[1..]);
    let address_hex = hex::encode(&hash[12..]);
    format!("0x{}", eip55_checksum(&address_hex))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ExtendedKey;

    #[test]
    fn test_known_address_from_vector_seed() {
        // "abandon ... about" seed at m/44'/60'/0'/0/0
        let seed = hex::decode(
            "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc1\
             9a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e4",
        )
        .unwrap();
        let master = ExtendedKey::master_from_seed(&seed).unwrap();
        let key = master.derive_path("m/44'/60'/0'/0/0").unwrap();
        let address = pubkey_to_address(&key.public_key_uncompressed());
        assert_eq!(address, "0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
    }

    #[test]
    fn test_address_shape() {
        let master = ExtendedKey::master_from_seed(&[0x42u8; 32]).unwrap();
        let address = pubkey_to_address(&master.public_key_uncompressed());
        assert!(address.starts_with("0x"));
        assert_eq!(address.len(), 42);
        // Checksummed form is stable
        assert_eq!(pubkey_to_address(&master.public_key_uncompressed()), address);
    }
}
