//! Shared-secret generation and provisioning URIs for authenticator apps.

use anyhow::Context;
use data_encoding::BASE32_NOPAD;
use rand::{RngCore, rngs::OsRng};
use url::Url;

use super::{TotpConfig, TotpError};

/// Secret length in bytes before base32 encoding (160 bits, RFC 4226 §4).
pub const SECRET_LEN: usize = 20;

/// Source of cryptographically secure random bytes.
///
/// Injected so enrollment can be made deterministic in tests; production
/// code uses [`OsRandom`].
pub trait RandomSource: Send + Sync {
    /// Fill `dest` with random bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying entropy source fails.
    fn fill_bytes(&self, dest: &mut [u8]) -> anyhow::Result<()>;
}

/// Operating-system CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) -> anyhow::Result<()> {
        OsRng
            .try_fill_bytes(dest)
            .context("failed to read from the OS random source")
    }
}

/// Generate a fresh shared secret, base32-encoded without padding.
///
/// Every call draws new bytes; secrets are never derived or reused.
///
/// # Errors
///
/// Returns an error if the random source fails.
pub fn generate_secret<R: RandomSource + ?Sized>(random: &R) -> Result<String, TotpError> {
    let mut bytes = [0u8; SECRET_LEN];
    random.fill_bytes(&mut bytes).map_err(TotpError::Random)?;
    Ok(BASE32_NOPAD.encode(&bytes))
}

/// Build the `otpauth://totp/...` URI an authenticator app enrolls from.
///
/// The label follows the `issuer:account` convention and is percent-encoded
/// by the `url` crate; algorithm, digit count and period are spelled out so
/// non-default configurations survive the QR round trip.
///
/// # Errors
///
/// Returns an error if the issuer/account pair cannot form a URI label.
pub fn provisioning_uri(
    secret: &str,
    issuer: &str,
    account: &str,
    config: &TotpConfig,
) -> Result<String, TotpError> {
    let mut uri = Url::parse("otpauth://totp").map_err(|_| TotpError::InvalidLabel)?;
    uri.path_segments_mut()
        .map_err(|()| TotpError::InvalidLabel)?
        .push(&format!("{issuer}:{account}"));
    uri.query_pairs_mut()
        .append_pair("secret", secret)
        .append_pair("issuer", issuer)
        .append_pair("algorithm", "SHA1")
        .append_pair("digits", &config.digits().to_string())
        .append_pair("period", &config.step_seconds().to_string());
    Ok(uri.into())
}
