use thiserror::Error;

/// Failure kinds surfaced to callers of the authentication core.
///
/// Collaborator failures (storage, hashing, randomness) are wrapped as
/// `Internal`; their details are kept for logging and never reach the
/// caller-facing kind.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown email or wrong password. The two cases are deliberately
    /// indistinguishable to prevent account enumeration.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("two-factor authentication is not set up")]
    TwoFactorNotSetup,
    /// One-time code wrong, malformed, or outside the accepted window.
    #[error("invalid one-time code")]
    InvalidToken,
    #[error("account already exists")]
    AlreadyExists,
    #[error("unauthorized")]
    Unauthorized,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Stable identifier for wire mapping by transport adapters.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::TwoFactorNotSetup => "two_factor_not_setup",
            Self::InvalidToken => "invalid_token",
            Self::AlreadyExists => "already_exists",
            Self::Unauthorized => "unauthorized",
            Self::Internal(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
