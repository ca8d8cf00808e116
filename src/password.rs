//! Password hashing as an injected capability.
//!
//! The state machine never touches a hashing primitive directly; it only
//! sees this trait. The default implementation is Argon2id in PHC string
//! format with OWASP-baseline parameters.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as Argon2PhcHasher,
        PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

/// Opaque one-way hashing capability.
///
/// Any salted, adaptive, constant-time-verifying scheme satisfies the
/// contract; implementations must never log or echo the plaintext.
pub trait PasswordHasher: Send + Sync {
    /// Hash a plaintext password into a self-describing stored form.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying primitive fails.
    fn hash(&self, password: &str) -> Result<String>;

    /// Verify a plaintext password against a stored hash.
    ///
    /// A mismatch is `Ok(false)`; only a malformed stored hash or primitive
    /// failure is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored hash cannot be parsed.
    fn verify(&self, password: &str, stored_hash: &str) -> Result<bool>;
}

/// Argon2id cost parameters.
#[derive(Clone, Debug)]
pub struct PasswordConfig {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Iteration count.
    pub time_cost: u32,
    /// Lanes.
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        // OWASP recommended minimum for Argon2id.
        Self {
            memory_cost: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl PasswordConfig {
    /// Cheap parameters for tests. Not suitable for stored credentials.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// Default [`PasswordHasher`] backed by Argon2id.
#[derive(Clone, Debug, Default)]
pub struct Argon2Hasher {
    config: PasswordConfig,
}

impl Argon2Hasher {
    #[must_use]
    pub fn new(config: PasswordConfig) -> Self {
        Self { config }
    }

    fn build(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.config.memory_cost,
            self.config.time_cost,
            self.config.parallelism,
            None,
        )
        .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.build()?
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| anyhow!("password hashing failed: {err}"))
    }

    fn verify(&self, password: &str, stored_hash: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(stored_hash).map_err(|_| anyhow!("invalid stored password hash"))?;
        // Parameters come from the stored PHC string, so old hashes keep
        // verifying after a config change.
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}
