//! Time-based one-time password engine.
//!
//! RFC 6238 TOTP over HMAC-SHA1 with 6-digit codes and 30-second time steps
//! by default, the parameters every mainstream authenticator app ships with.
//! Verification walks a configurable drift window around the current time
//! step and compares candidate codes in constant time via the `subtle` crate.
//!
//! The engine is pure and stateless. It does not track previously accepted
//! codes; a caller that needs replay protection must remember the last
//! accepted counter per user and reject anything non-increasing.

pub mod secret;

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Error)]
pub enum TotpError {
    #[error("invalid base32 secret")]
    InvalidSecret,
    #[error("hmac key error")]
    Hmac,
    #[error("invalid provisioning label")]
    InvalidLabel,
    #[error("random source failure")]
    Random(#[source] anyhow::Error),
}

/// Code generation parameters shared by enrollment and verification.
#[derive(Clone, Debug)]
pub struct TotpConfig {
    digits: u32,
    step_seconds: u64,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            digits: 6,
            step_seconds: 30,
        }
    }
}

impl TotpConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the code length. Values outside 1..=9 fall back to the default
    /// of 6; ten or more digits would overflow the 31-bit truncated value.
    #[must_use]
    pub fn with_digits(mut self, digits: u32) -> Self {
        self.digits = if (1..=9).contains(&digits) { digits } else { 6 };
        self
    }

    /// Set the time step. Zero falls back to the default of 30 seconds.
    #[must_use]
    pub fn with_step_seconds(mut self, step_seconds: u64) -> Self {
        self.step_seconds = if step_seconds == 0 { 30 } else { step_seconds };
        self
    }

    #[must_use]
    pub fn digits(&self) -> u32 {
        self.digits
    }

    #[must_use]
    pub fn step_seconds(&self) -> u64 {
        self.step_seconds
    }

    /// Compute the code for `time` (Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is not valid unpadded base32 or the
    /// HMAC key setup fails.
    pub fn code_at(&self, secret: &str, time: u64) -> Result<String, TotpError> {
        let key = decode_secret(secret)?;
        self.hotp(&key, time / self.step_seconds)
    }

    /// Check `candidate` against every counter in the drift window around
    /// `time`, tolerating up to `window * step_seconds` of clock skew in
    /// either direction. `window == 0` accepts the current step only.
    ///
    /// Any failure (wrong shape, undecodable secret) is a plain `false`;
    /// verification never panics and never reports why it failed.
    #[must_use]
    pub fn verify_at(&self, secret: &str, candidate: &str, time: u64, window: u32) -> bool {
        let candidate = candidate.trim();
        if candidate.len() != self.digits as usize
            || !candidate.bytes().all(|b| b.is_ascii_digit())
        {
            return false;
        }

        let Ok(key) = decode_secret(secret) else {
            return false;
        };

        let counter = i64::try_from(time / self.step_seconds).unwrap_or(i64::MAX);
        let window = i64::from(window);
        let mut matched = false;

        // Walk the whole window even after a match to keep timing flat.
        for offset in -window..=window {
            let Ok(step) = u64::try_from(counter.saturating_add(offset)) else {
                continue;
            };
            let Ok(expected) = self.hotp(&key, step) else {
                continue;
            };
            matched |= bool::from(candidate.as_bytes().ct_eq(expected.as_bytes()));
        }

        matched
    }

    /// HOTP value for one counter: HMAC-SHA1 over the big-endian counter,
    /// then RFC 4226 dynamic truncation to `digits` decimal digits.
    fn hotp(&self, key: &[u8], counter: u64) -> Result<String, TotpError> {
        let mut mac = HmacSha1::new_from_slice(key).map_err(|_| TotpError::Hmac)?;
        mac.update(&counter.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let offset = usize::from(digest[19] & 0x0f);
        let binary = (u32::from(digest[offset] & 0x7f) << 24)
            | (u32::from(digest[offset + 1]) << 16)
            | (u32::from(digest[offset + 2]) << 8)
            | u32::from(digest[offset + 3]);

        let code = binary % 10u32.pow(self.digits);
        Ok(format!("{code:0width$}", width = self.digits as usize))
    }
}

/// Decode an unpadded base32 secret, tolerating stray whitespace and
/// lowercase input as produced by some authenticator exports.
fn decode_secret(secret: &str) -> Result<Vec<u8>, TotpError> {
    let cleaned: String = secret
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    BASE32_NOPAD
        .decode(cleaned.as_bytes())
        .map_err(|_| TotpError::InvalidSecret)
}
