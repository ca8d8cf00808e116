//! # Secondo (Password + TOTP Authentication Core)
//!
//! `secondo` is the authentication core for password logins with an optional
//! time-based one-time-password second factor. It owns the authentication
//! state machine and the OTP engine; transports, persistence engines, and
//! QR rendering stay behind the traits in [`store`], [`password`],
//! [`clock`], and [`totp::secret`].
//!
//! ## Login flow
//!
//! A login moves through password verification, then either completes
//! immediately or parks at a second-factor challenge:
//!
//! - password ok, second factor disabled: a signed session token is minted
//!   in the same call.
//! - password ok, second factor enabled: the caller gets a challenge marker
//!   (never a token) and must prove a one-time code to finish.
//! - any failure: the attempt ends; nothing is retained between attempts.
//!
//! Unknown-email and wrong-password failures are deliberately identical in
//! kind, payload, and cost, so login responses cannot be used to enumerate
//! accounts.
//!
//! ## Second-factor lifecycle
//!
//! Enrollment generates a fresh 160-bit secret and stores it with
//! enablement switched off, atomically, which invalidates any previously
//! confirmed secret at that instant. Enablement turns on only after the
//! user proves a code computed from the new secret. Verification tolerates
//! one time step of clock drift by default and compares codes in constant
//! time.
//!
//! ## Sessions
//!
//! Tokens are HMAC-SHA256 signed claims with an embedded expiry; verifying
//! a presented token needs no storage lookup. The issuing strategy is a
//! trait, so a cookie-backed session store can replace the signed token
//! without touching the state machine.

pub mod clock;
pub mod error;
pub mod password;
pub mod service;
pub mod store;
pub mod token;
pub mod totp;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use error::{Error, Result};
pub use password::{Argon2Hasher, PasswordConfig, PasswordHasher};
pub use service::{AuthConfig, AuthService};
pub use store::{CredentialStore, CredentialUpdate, MemoryStore, UserCredential};
pub use token::{HmacTokenIssuer, TokenClaims, TokenError, TokenIssuer};
pub use totp::secret::{OsRandom, RandomSource};
pub use totp::{TotpConfig, TotpError};
pub use types::{AuthenticatedUser, Enrollment, LoginOutcome, RegisteredUser, TokenGrant};
