//! Signed session tokens.
//!
//! Once every required factor has been satisfied the state machine mints a
//! compact three-part token, `base64url(header).base64url(claims).base64url(sig)`,
//! integrity-protected with a server-held key. Verification is stateless: a
//! holder of the key can check a presented token without a storage lookup,
//! and the embedded expiry bounds exposure instead of a revocation list.
//!
//! The issuing strategy is a trait so embedders can swap in an opaque
//! cookie-backed session instead of the signed token.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::store::UserCredential;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_ALG: &str = "HS256";
const TOKEN_TYP: &str = "JWT";

pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported header")]
    UnsupportedHeader,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("hmac key error")]
    Hmac,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: TOKEN_ALG.to_string(),
            typ: TOKEN_TYP.to_string(),
        }
    }
}

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub sub: Uuid,
    pub email: String,
    /// Whether the subject authenticated with a second factor enabled.
    pub mfa: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Strategy for minting and checking session credentials.
pub trait TokenIssuer: Send + Sync {
    /// Mint a token for an authenticated user. `now` is Unix seconds.
    ///
    /// # Errors
    ///
    /// Returns an error if signing or encoding fails.
    fn issue(&self, user: &UserCredential, now: i64) -> Result<String, TokenError>;

    /// Verify a presented token and return its claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, forged, or expired.
    fn verify(&self, token: &str, now: i64) -> Result<TokenClaims, TokenError>;
}

/// [`TokenIssuer`] signing with HMAC-SHA256 and a server-held key.
pub struct HmacTokenIssuer {
    key: SecretBox<Vec<u8>>,
    ttl_seconds: i64,
}

impl HmacTokenIssuer {
    #[must_use]
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: SecretBox::new(Box::new(key.to_vec())),
            ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(self.key.expose_secret()).map_err(|_| TokenError::Hmac)
    }
}

impl TokenIssuer for HmacTokenIssuer {
    fn issue(&self, user: &UserCredential, now: i64) -> Result<String, TokenError> {
        let claims = TokenClaims {
            sub: user.id,
            email: user.email.clone(),
            mfa: user.two_factor_enabled,
            iat: now,
            exp: now.saturating_add(self.ttl_seconds),
        };

        let signing_input = format!("{}.{}", b64e_json(&TokenHeader::hs256())?, b64e_json(&claims)?);
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }

    fn verify(&self, token: &str, now: i64) -> Result<TokenClaims, TokenError> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::TokenFormat);
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Base64)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        // Constant-time comparison inside verify_slice.
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != TOKEN_ALG || header.typ != TOKEN_TYP {
            return Err(TokenError::UnsupportedHeader);
        }

        let claims: TokenClaims = b64d_json(claims_b64)?;
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}
