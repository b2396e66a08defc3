//! BIP-39 mnemonic generation and seed derivation

use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

/// Supported mnemonic lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordCount {
    /// 12 words (128-bit entropy)
    Twelve = 12,
    /// 24 words (256-bit entropy)
    TwentyFour = 24,
}

impl WordCount {
    /// Entropy bytes required for this word count
    #[inline]
    pub const fn entropy_bytes(self) -> usize {
        match self {
            WordCount::Twelve => 16,
            WordCount::TwentyFour => 32,
        }
    }
}

/// A validated BIP-39 mnemonic phrase.
///
/// The phrase is overwritten with zeros when the value is dropped, and the
/// `Debug` impl never prints it. Seed derivation uses PBKDF2-HMAC-SHA512
/// with 2048 rounds and salt `"mnemonic" || passphrase` per the standard.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Mnemonic {
    phrase: String,
    word_count: usize,
}

impl std::fmt::Debug for Mnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mnemonic")
            .field("word_count", &self.word_count)
            .field("phrase", &"[REDACTED]")
            .finish()
    }
}

impl Mnemonic {
    /// Generate a fresh mnemonic from OS entropy
    pub fn generate(word_count: WordCount) -> Self {
        let entropy_size = word_count.entropy_bytes();

        let mut entropy = [0u8; 32];
        OsRng.fill_bytes(&mut entropy[..entropy_size]);

        let mnemonic =
            bip39::Mnemonic::from_entropy(&entropy[..entropy_size]).expect("valid entropy size");
        entropy.zeroize();

        Self {
            phrase: mnemonic.to_string(),
            word_count: word_count as usize,
        }
    }

    /// Parse and validate an existing phrase.
    ///
    /// Checks word count (12 or 24), wordlist membership, and checksum.
    /// Whitespace is normalized.
    pub fn parse(phrase: &str) -> Result<Self> {
        let words: Vec<&str> = phrase.split_whitespace().collect();
        let count = words.len();

        if !matches!(count, 12 | 24) {
            return Err(Error::InvalidMnemonic(format!(
                "expected 12 or 24 words, got {}",
                count
            )));
        }

        let normalized = words.join(" ");
        bip39::Mnemonic::parse(&normalized)
            .map_err(|e| Error::InvalidMnemonic(e.to_string()))?;

        Ok(Self {
            phrase: normalized,
            word_count: count,
        })
    }

    /// The phrase itself. Handle with care; never log it.
    #[inline]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    #[inline]
    pub fn word_count(&self) -> usize {
        self.word_count
    }

    /// Derive the 64-byte seed (PBKDF2-HMAC-SHA512, 2048 rounds)
    pub fn to_seed(&self, passphrase: &str) -> Zeroizing<[u8; 64]> {
        let mnemonic = bip39::Mnemonic::parse(&self.phrase).expect("phrase validated on construction");
        Zeroizing::new(mnemonic.to_seed(passphrase))
    }

    /// Validate a phrase without constructing a `Mnemonic`
    pub fn validate(phrase: &str) -> bool {
        Self::parse(phrase).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_generate_12_words() {
        let m = Mnemonic::generate(WordCount::Twelve);
        assert_eq!(m.word_count(), 12);
        assert!(Mnemonic::validate(m.phrase()));
    }

    #[test]
    fn test_generate_24_words() {
        let m = Mnemonic::generate(WordCount::TwentyFour);
        assert_eq!(m.word_count(), 24);
        assert!(Mnemonic::validate(m.phrase()));
    }

    #[test]
    fn test_generate_is_unique() {
        let a = Mnemonic::generate(WordCount::Twelve);
        let b = Mnemonic::generate(WordCount::Twelve);
        assert_ne!(a.phrase(), b.phrase());
    }

    #[test]
    fn test_parse_normalizes_whitespace() {
        let messy = format!("  {}  ", TEST_MNEMONIC.replace(' ', "   "));
        let m = Mnemonic::parse(&messy).unwrap();
        assert_eq!(m.phrase(), TEST_MNEMONIC);
    }

    #[test]
    fn test_parse_rejects_bad_word_count() {
        assert!(matches!(
            Mnemonic::parse("abandon abandon abandon"),
            Err(Error::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        let bad = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon";
        assert!(matches!(
            Mnemonic::parse(bad),
            Err(Error::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn test_seed_matches_bip39_vector() {
        // Trezor test vector, empty passphrase
        let m = Mnemonic::parse(TEST_MNEMONIC).unwrap();
        let seed = m.to_seed("");
        assert_eq!(
            hex::encode(&seed[..]),
            "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc1\
             9a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e4"
        );
    }

    #[test]
    fn test_seed_passphrase_changes_seed() {
        let m = Mnemonic::parse(TEST_MNEMONIC).unwrap();
        assert_ne!(m.to_seed("")[..], m.to_seed("TREZOR")[..]);
    }

    #[test]
    fn test_debug_redacts_phrase() {
        let m = Mnemonic::parse(TEST_MNEMONIC).unwrap();
        let out = format!("{:?}", m);
        assert!(!out.contains("abandon"));
        assert!(out.contains("REDACTED"));
    }
}
