//! Shamir secret sharing over GF(2^8).
//!
//! Used to spread a data key across several key groups: each group protects
//! one share, and any `threshold` shares rebuild the key. Every share is the
//! polynomial evaluations for each secret byte followed by one trailing byte
//! holding the share's x coordinate.

use rand::seq::SliceRandom;
use rand::RngCore;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShamirError {
    #[error("cannot split an empty secret")]
    EmptySecret,
    #[error("threshold must be at least 1")]
    ThresholdTooSmall,
    #[error("parts ({parts}) cannot be less than threshold ({threshold})")]
    PartsBelowThreshold { parts: usize, threshold: usize },
    #[error("parts cannot exceed 255, got {0}")]
    TooManyParts(usize),
    #[error("no shares to combine")]
    NoShares,
    #[error("shares must be at least 2 bytes and all of the same length")]
    MalformedShares,
    #[error("duplicate share detected")]
    DuplicateShare,
}

/// Multiply in GF(2^8) with the AES reduction polynomial.
fn mul(mut a: u8, mut b: u8) -> u8 {
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

/// Multiplicative inverse, `a^254`. Zero has no inverse and maps to zero.
fn inverse(a: u8) -> u8 {
    let mut result = 1u8;
    let mut base = a;
    let mut exp = 254u8;
    while exp != 0 {
        if exp & 1 != 0 {
            result = mul(result, base);
        }
        base = mul(base, base);
        exp >>= 1;
    }
    result
}

fn div(a: u8, b: u8) -> u8 {
    mul(a, inverse(b))
}

/// Evaluate a polynomial (coefficients lowest degree first) at `x`.
fn evaluate(coefficients: &[u8], x: u8) -> u8 {
    coefficients
        .iter()
        .rev()
        .fold(0u8, |acc, &coefficient| mul(acc, x) ^ coefficient)
}

/// Lagrange interpolation of the points at `x = 0`.
fn interpolate(xs: &[u8], ys: &[u8]) -> u8 {
    let mut result = 0u8;
    for (i, (&xi, &yi)) in xs.iter().zip(ys).enumerate() {
        let mut basis = 1u8;
        for (j, &xj) in xs.iter().enumerate() {
            if i != j {
                basis = mul(basis, div(xj, xj ^ xi));
            }
        }
        result ^= mul(yi, basis);
    }
    result
}

/// Split `secret` into `parts` shares, any `threshold` of which recover it.
pub fn split(secret: &[u8], parts: usize, threshold: usize) -> Result<Vec<Vec<u8>>, ShamirError> {
    if secret.is_empty() {
        return Err(ShamirError::EmptySecret);
    }
    if threshold == 0 {
        return Err(ShamirError::ThresholdTooSmall);
    }
    if parts < threshold {
        return Err(ShamirError::PartsBelowThreshold { parts, threshold });
    }
    if parts > 255 {
        return Err(ShamirError::TooManyParts(parts));
    }

    let mut rng = rand::thread_rng();
    let mut x_coordinates: Vec<u8> = (1..=255).collect();
    x_coordinates.shuffle(&mut rng);
    x_coordinates.truncate(parts);

    let mut shares: Vec<Vec<u8>> = x_coordinates
        .iter()
        .map(|_| Vec::with_capacity(secret.len() + 1))
        .collect();

    let mut coefficients = vec![0u8; threshold];
    for &byte in secret {
        coefficients[0] = byte;
        rng.fill_bytes(&mut coefficients[1..]);
        for (share, &x) in shares.iter_mut().zip(&x_coordinates) {
            share.push(evaluate(&coefficients, x));
        }
    }

    for (share, &x) in shares.iter_mut().zip(&x_coordinates) {
        share.push(x);
    }
    Ok(shares)
}

/// Rebuild the secret from shares produced by [`split`].
///
/// Passing fewer shares than the split threshold yields garbage rather than
/// an error; callers authenticate the result.
pub fn combine(shares: &[Vec<u8>]) -> Result<Vec<u8>, ShamirError> {
    let first = shares.first().ok_or(ShamirError::NoShares)?;
    let share_len = first.len();
    if share_len < 2 || shares.iter().any(|s| s.len() != share_len) {
        return Err(ShamirError::MalformedShares);
    }

    let xs: Vec<u8> = shares.iter().map(|s| s[share_len - 1]).collect();
    for (i, x) in xs.iter().enumerate() {
        if xs[..i].contains(x) {
            return Err(ShamirError::DuplicateShare);
        }
    }

    let secret_len = share_len - 1;
    let mut secret = Vec::with_capacity(secret_len);
    let mut ys = vec![0u8; shares.len()];
    for idx in 0..secret_len {
        for (y, share) in ys.iter_mut().zip(shares) {
            *y = share[idx];
        }
        secret.push(interpolate(&xs, &ys));
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_inverse_is_consistent() {
        for a in 1..=255u8 {
            assert_eq!(mul(a, inverse(a)), 1, "inverse failed for {a}");
        }
    }

    #[test]
    fn any_threshold_subset_recovers_secret() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let shares = split(secret, 5, 3).unwrap();
        assert_eq!(shares.len(), 5);

        let subset = vec![shares[4].clone(), shares[0].clone(), shares[2].clone()];
        assert_eq!(combine(&subset).unwrap(), secret);

        let all = shares.clone();
        assert_eq!(combine(&all).unwrap(), secret);
    }

    #[test]
    fn below_threshold_does_not_recover() {
        let secret = [0xAAu8; 32];
        let shares = split(&secret, 3, 3).unwrap();
        let recovered = combine(&shares[..2]).unwrap();
        assert_ne!(recovered, secret);
    }

    #[test]
    fn threshold_of_one_copies_the_secret() {
        let shares = split(b"key", 2, 1).unwrap();
        assert_eq!(combine(&shares[1..]).unwrap(), b"key");
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert_eq!(split(b"", 2, 2), Err(ShamirError::EmptySecret));
        assert_eq!(split(b"k", 2, 0), Err(ShamirError::ThresholdTooSmall));
        assert_eq!(
            split(b"k", 2, 3),
            Err(ShamirError::PartsBelowThreshold { parts: 2, threshold: 3 })
        );
        assert_eq!(combine(&[]), Err(ShamirError::NoShares));

        let shares = split(b"k", 2, 2).unwrap();
        assert_eq!(
            combine(&[shares[0].clone(), shares[0].clone()]),
            Err(ShamirError::DuplicateShare)
        );
    }
}
