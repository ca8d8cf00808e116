//! Credential storage collaborator.
//!
//! The core owns no persistence; it drives this trait. Implementations must
//! apply multi-field updates atomically: an enrollment writes the new secret
//! and the disabled flag as one visible change, never split.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

/// A stored user credential record.
///
/// `password_hash` and `totp_secret` are sensitive; the struct deliberately
/// implements neither `Debug` nor `Serialize` so they cannot reach logs or
/// wire payloads by accident.
#[derive(Clone)]
pub struct UserCredential {
    pub id: Uuid,
    /// Stored normalized (trimmed, lowercased); compared case-insensitively.
    pub email: String,
    pub password_hash: String,
    /// Base32 shared secret, present only after an enrollment started.
    pub totp_secret: Option<String>,
    /// True only after a fresh secret was confirmed with a valid code.
    pub two_factor_enabled: bool,
}

/// Partial update applied atomically by [`CredentialStore::update`].
#[derive(Default)]
pub struct CredentialUpdate {
    pub password_hash: Option<String>,
    pub totp_secret: Option<String>,
    pub two_factor_enabled: Option<bool>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Case-insensitive lookup by email.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserCredential>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserCredential>>;

    /// Create a credential record. Returns `None` when the email is taken.
    async fn create(&self, email: &str, password_hash: &str)
        -> Result<Option<UserCredential>>;

    /// Apply every populated field of `update` as one atomic write.
    /// Returns `false` when no record with `id` exists.
    async fn update(&self, id: Uuid, update: CredentialUpdate) -> Result<bool>;
}

/// In-memory [`CredentialStore`] for tests and embedders without a database.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, UserCredential>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserCredential>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("credential store lock poisoned"))?;
        Ok(records
            .values()
            .find(|record| record.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserCredential>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("credential store lock poisoned"))?;
        Ok(records.get(&id).cloned())
    }

    async fn create(&self, email: &str, password_hash: &str)
        -> Result<Option<UserCredential>> {
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow!("credential store lock poisoned"))?;
        if records
            .values()
            .any(|record| record.email.eq_ignore_ascii_case(email))
        {
            return Ok(None);
        }

        let record = UserCredential {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            totp_secret: None,
            two_factor_enabled: false,
        };
        records.insert(record.id, record.clone());
        Ok(Some(record))
    }

    async fn update(&self, id: Uuid, update: CredentialUpdate) -> Result<bool> {
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow!("credential store lock poisoned"))?;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        // Single mutation under the write lock keeps the fields consistent.
        if let Some(password_hash) = update.password_hash {
            record.password_hash = password_hash;
        }
        if let Some(totp_secret) = update.totp_secret {
            record.totp_secret = Some(totp_secret);
        }
        if let Some(two_factor_enabled) = update.two_factor_enabled {
            record.two_factor_enabled = two_factor_enabled;
        }
        Ok(true)
    }
}
