//! Ethereum legacy transactions: RLP encoding, EIP-155 signing, and the
//! JSON shapes shared with the offline signer

use k256::ecdsa::SigningKey;
use rlp::RlpStream;
use serde::{Deserialize, Serialize};

use crate::crypto::hash::keccak256;
use crate::error::{Error, Result};

/// Standard gas limit for a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// A transaction waiting to be signed.
///
/// Carries everything the offline signer needs, including the derivation
/// path selecting the key and the chain id for EIP-155 replay protection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub chain: String,
    pub from: String,
    pub to: String,
    /// Amount in wei, decimal string
    pub amount: String,
    pub nonce: u64,
    pub gas_limit: u64,
    /// Gas price in wei, decimal string
    pub gas_price: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
    pub derivation_path: String,
    pub chain_id: u64,
}

/// The result of signing: broadcast-ready raw bytes plus the hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx_hash: String,
    pub raw_tx: String,
}

/// A legacy (pre-EIP-1559) Ethereum transaction
#[derive(Debug, Clone)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    /// Sign under EIP-155: the sighash commits to the chain id, and
    /// `v = chain_id * 2 + 35 + recovery_id`.
    pub fn sign(&self, key: &SigningKey, chain_id: u64) -> Result<SignedTransaction> {
        let mut unsigned = RlpStream::new_list(9);
        self.append_fields(&mut unsigned);
        unsigned.append(&chain_id);
        unsigned.append_empty_data();
        unsigned.append_empty_data();
        let sighash = keccak256(&unsigned.out());

        let (signature, recovery_id) = key
            .sign_prehash_recoverable(&sighash)
            .map_err(|e| Error::Signing(e.to_string()))?;
        let sig_bytes = signature.to_bytes();

        let v = chain_id
            .checked_mul(2)
            .and_then(|x| x.checked_add(35 + recovery_id.to_byte() as u64))
            .ok_or_else(|| Error::Signing("chain id overflow".into()))?;

        let mut signed = RlpStream::new_list(9);
        self.append_fields(&mut signed);
        signed.append(&v);
        signed.append(&strip_leading_zeros(&sig_bytes[..32]));
        signed.append(&strip_leading_zeros(&sig_bytes[32..]));

        let raw = signed.out().to_vec();
        let tx_hash = format!("0x{}", hex::encode(keccak256(&raw)));
        Ok(SignedTransaction {
            tx_hash,
            raw_tx: format!("0x{}", hex::encode(raw)),
        })
    }

    fn append_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&trim_u128(self.gas_price));
        stream.append(&self.gas_limit);
        stream.append(&self.to.to_vec());
        stream.append(&trim_u128(self.value));
        stream.append(&self.data);
    }
}

impl UnsignedTransaction {
    /// Convert the JSON shape into a signable transaction
    pub fn to_legacy(&self) -> Result<LegacyTransaction> {
        let value: u128 = self
            .amount
            .parse()
            .map_err(|_| Error::InvalidAmount(self.amount.clone()))?;
        let gas_price: u128 = self
            .gas_price
            .parse()
            .map_err(|_| Error::InvalidAmount(self.gas_price.clone()))?;
        let data = if self.data.is_empty() {
            Vec::new()
        } else {
            hex::decode(self.data.trim_start_matches("0x"))
                .map_err(|_| Error::Serialization(format!("invalid data hex: {}", self.data)))?
        };
        Ok(LegacyTransaction {
            nonce: self.nonce,
            to: parse_eth_address(&self.to)?,
            value,
            gas_limit: self.gas_limit,
            gas_price,
            data,
        })
    }
}

/// Parse a 0x-prefixed 20-byte hex address
pub fn parse_eth_address(address: &str) -> Result<[u8; 20]> {
    let bytes = hex::decode(address.trim_start_matches("0x"))
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidAddress(address.to_string()))
}

/// RLP encodes integers as minimal big-endian byte strings
fn trim_u128(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

/// Convert a chain-native decimal string ("0.5") into wei.
///
/// At most 18 fractional digits; anything else is rejected rather than
/// silently truncated.
pub fn eth_to_wei(amount: &str) -> Result<u128> {
    let amount = amount.trim();
    let bad = || Error::InvalidAmount(amount.to_string());

    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(bad());
    }
    if frac_part.len() > 18 {
        return Err(bad());
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(bad());
    }

    let int_value: u128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| bad())?
    };
    let mut frac_value: u128 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse().map_err(|_| bad())?
    };
    frac_value *= 10u128.pow(18 - frac_part.len() as u32);

    int_value
        .checked_mul(1_000_000_000_000_000_000)
        .and_then(|wei| wei.checked_add(frac_value))
        .ok_or_else(bad)
}

/// Inverse of [`eth_to_wei`]; trims trailing fractional zeros
pub fn wei_to_eth(wei: u128) -> String {
    const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;
    let int_part = wei / WEI_PER_ETH;
    let frac_part = wei % WEI_PER_ETH;
    if frac_part == 0 {
        return int_part.to_string();
    }
    let frac = format!("{:018}", frac_part);
    format!("{}.{}", int_part, frac.trim_end_matches('0'))
}
