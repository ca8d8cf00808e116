//! Transport-agnostic request/response shapes.
//!
//! These are what an HTTP (or RPC) adapter serializes; nothing here carries
//! a password hash or a confirmed TOTP secret.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::UserCredential;

/// Public view of a credential record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: String,
    pub two_factor_enabled: bool,
}

impl From<&UserCredential> for AuthenticatedUser {
    fn from(record: &UserCredential) -> Self {
        Self {
            id: record.id,
            email: record.email.clone(),
            two_factor_enabled: record.two_factor_enabled,
        }
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredUser {
    pub id: Uuid,
    pub email: String,
}

/// A minted session token together with the user it identifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub user: AuthenticatedUser,
}

/// Outcome of the password step of a login.
///
/// The `TwoFactorRequired` variant structurally cannot carry a token, so a
/// session credential can never leak before the second factor is proven.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginOutcome {
    /// No second factor required; fully authenticated.
    Authenticated {
        token: String,
        user: AuthenticatedUser,
    },
    /// Password accepted, second factor pending.
    TwoFactorRequired { user_id: Uuid },
}

/// Material returned when a two-factor enrollment starts.
///
/// The secret is shown to the user exactly once; only its stored copy is
/// consulted afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub secret: String,
    pub provisioning_uri: String,
}
