//! Bitcoin P2PKH address encoding

use crate::crypto::hash::hash160;
use crate::error::{Error, Result};
use crate::model::Network;

fn version_byte(network: Network) -> u8 {
    match network {
        Network::Mainnet => 0x00,
        Network::Testnet => 0x6f,
    }
}

/// Encode a compressed public key as a base58check P2PKH address
pub fn pubkey_to_address(compressed: &[u8; 33], network: Network) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(version_byte(network));
    payload.extend_from_slice(&hash160(compressed));
    bs58::encode(payload).with_check().into_string()
}

/// Validate an address and return its version byte
pub fn decode_address(address: &str) -> Result<u8> {
    let payload = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;
    if payload.len() != 21 {
        return Err(Error::InvalidAddress(address.to_string()));
    }
    Ok(payload[0])
}
