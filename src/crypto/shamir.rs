//! Shamir secret sharing over GF(256)
//!
//! Each share is `[x_coordinate(1 byte) || y_0 .. y_{len-1}]` where `y_i`
//! evaluates a random degree `t-1` polynomial whose constant term is byte
//! `i` of the secret. Any `t` shares reconstruct the secret by Lagrange
//! interpolation at x = 0; fewer reveal nothing.

use rand::{rngs::OsRng, RngCore};

use crate::error::{Error, Result};

/// Split `secret` into `parts` shares, any `threshold` of which recover it.
pub fn split(secret: &[u8], parts: u8, threshold: u8) -> Result<Vec<Vec<u8>>> {
    if secret.is_empty() {
        return Err(Error::InvalidShare("secret is empty".into()));
    }
    if parts == 0 || threshold == 0 {
        return Err(Error::InvalidShare("parts and threshold must be >= 1".into()));
    }
    if threshold > parts {
        return Err(Error::InvalidShare(format!(
            "threshold {} exceeds parts {}",
            threshold, parts
        )));
    }

    // One polynomial per secret byte; coefficient 0 is the secret byte.
    let mut polynomials = Vec::with_capacity(secret.len());
    for &byte in secret {
        let mut coeffs = vec![0u8; threshold as usize];
        coeffs[0] = byte;
        OsRng.fill_bytes(&mut coeffs[1..]);
        polynomials.push(coeffs);
    }

    let mut shares = Vec::with_capacity(parts as usize);
    for x in 1..=parts {
        let mut share = Vec::with_capacity(1 + secret.len());
        share.push(x);
        for coeffs in &polynomials {
            share.push(poly_eval(coeffs, x));
        }
        shares.push(share);
    }
    Ok(shares)
}

/// Recover the secret from at least `threshold` shares produced by [`split`].
pub fn combine(shares: &[Vec<u8>]) -> Result<Vec<u8>> {
    if shares.is_empty() {
        return Err(Error::InvalidShare("no shares provided".into()));
    }
    let len = shares[0].len();
    if len < 2 {
        return Err(Error::InvalidShare("share too short".into()));
    }
    if shares.iter().any(|s| s.len() != len) {
        return Err(Error::InvalidShare("shares have mixed lengths".into()));
    }

    let xs: Vec<u8> = shares.iter().map(|s| s[0]).collect();
    for (i, &x) in xs.iter().enumerate() {
        if x == 0 {
            return Err(Error::InvalidShare("share has x coordinate 0".into()));
        }
        if xs[..i].contains(&x) {
            return Err(Error::InvalidShare(format!("duplicate x coordinate {}", x)));
        }
    }

    let mut secret = Vec::with_capacity(len - 1);
    for byte_idx in 1..len {
        let ys: Vec<u8> = shares.iter().map(|s| s[byte_idx]).collect();
        secret.push(interpolate_at_zero(&xs, &ys));
    }
    Ok(secret)
}

/// Horner evaluation of `coeffs` (constant term first) at `x`
fn poly_eval(coeffs: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &c in coeffs.iter().rev() {
        acc = gf_mul(acc, x) ^ c;
    }
    acc
}

/// Lagrange interpolation of the polynomial value at x = 0
fn interpolate_at_zero(xs: &[u8], ys: &[u8]) -> u8 {
    let mut acc = 0u8;
    for i in 0..xs.len() {
        let mut basis = 1u8;
        for j in 0..xs.len() {
            if i == j {
                continue;
            }
            // In GF(256) subtraction is XOR, so L_i(0) = prod x_j / (x_i + x_j)
            basis = gf_mul(basis, gf_div(xs[j], xs[i] ^ xs[j]));
        }
        acc ^= gf_mul(basis, ys[i]);
    }
    acc
}

/// Multiplication in GF(2^8) with the AES reduction polynomial 0x11B
fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    product
}

fn gf_div(a: u8, b: u8) -> u8 {
    debug_assert!(b != 0, "division by zero in GF(256)");
    gf_mul(a, gf_inv(b))
}

/// Multiplicative inverse: a^254 in GF(256)
fn gf_inv(a: u8) -> u8 {
    let mut result = 1u8;
    let mut base = a;
    let mut exp = 254u32;
    while exp > 0 {
        if exp & 1 != 0 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gf_mul_identities() {
        for a in 0..=255u8 {
            assert_eq!(gf_mul(a, 1), a);
            assert_eq!(gf_mul(a, 0), 0);
        }
        // 0x53 * 0xCA = 0x01 is the classic AES field example
        assert_eq!(gf_mul(0x53, 0xca), 0x01);
    }

    #[test]
    fn test_gf_inv() {
        for a in 1..=255u8 {
            assert_eq!(gf_mul(a, gf_inv(a)), 1);
        }
    }

    #[test]
    fn test_split_2_of_3_recovers() {
        let secret = hex::decode("deadbeefcafebabe0123456789abcdef").unwrap();
        let shares = split(&secret, 3, 2).unwrap();
        assert_eq!(shares.len(), 3);

        // Every pair recovers the secret
        for (i, j) in [(0, 1), (0, 2), (1, 2)] {
            let subset = vec![shares[i].clone(), shares[j].clone()];
            assert_eq!(combine(&subset).unwrap(), secret);
        }
        // All three as well
        assert_eq!(combine(&shares).unwrap(), secret);
    }

    #[test]
    fn test_single_share_does_not_recover() {
        let secret = b"super secret entropy".to_vec();
        let shares = split(&secret, 3, 2).unwrap();
        // With threshold 2 a single share interpolates to its own y values,
        // not the secret (probability of collision is negligible).
        let got = combine(&shares[..1].to_vec()).unwrap();
        assert_ne!(got, secret);
    }

    #[test]
    fn test_threshold_one_gives_constant_shares() {
        let secret = vec![0x42u8; 8];
        let shares = split(&secret, 4, 1).unwrap();
        for share in &shares {
            assert_eq!(combine(&[share.clone()]).unwrap(), secret);
        }
    }

    #[test]
    fn test_5_of_5() {
        let secret = vec![1u8, 2, 3, 4, 5];
        let shares = split(&secret, 5, 5).unwrap();
        assert_eq!(combine(&shares).unwrap(), secret);
        // One short must not reconstruct
        assert_ne!(combine(&shares[..4].to_vec()).unwrap(), secret);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(split(b"", 3, 2).is_err());
        assert!(split(b"x", 2, 3).is_err());
        assert!(split(b"x", 0, 0).is_err());
        assert!(combine(&[]).is_err());
        assert!(combine(&[vec![1]]).is_err());
        assert!(combine(&[vec![1, 2, 3], vec![2, 3]]).is_err());
        assert!(combine(&[vec![1, 2], vec![1, 3]]).is_err());
        assert!(combine(&[vec![0, 2]]).is_err());
    }
}
