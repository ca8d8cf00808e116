//! Authentication state machine.
//!
//! Drives a login through password verification, an optional second-factor
//! challenge, and token issuance, plus the enrollment lifecycle for the
//! second factor. Every collaborator (storage, hashing, clock, randomness,
//! token strategy) is injected at construction so the whole flow runs
//! deterministically under test.
//!
//! A login either completes in one step (no second factor), or parks at the
//! challenge marker until `complete_two_factor` proves the code. Failures
//! drop straight back to unauthenticated; no partial state survives a failed
//! attempt.

use anyhow::Context;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::password::PasswordHasher;
use crate::store::{CredentialStore, CredentialUpdate};
use crate::token::TokenIssuer;
use crate::totp::TotpConfig;
use crate::totp::secret::{OsRandom, RandomSource, generate_secret, provisioning_uri};
use crate::types::{AuthenticatedUser, Enrollment, LoginOutcome, RegisteredUser, TokenGrant};

const DEFAULT_ISSUER: &str = "secondo";
const DEFAULT_DRIFT_WINDOW: u32 = 1;

const ENV_ISSUER: &str = "SECONDO_ISSUER";
const ENV_TOTP_DIGITS: &str = "SECONDO_TOTP_DIGITS";
const ENV_TOTP_STEP_SECONDS: &str = "SECONDO_TOTP_STEP_SECONDS";
const ENV_DRIFT_WINDOW: &str = "SECONDO_DRIFT_WINDOW";

/// Authentication policy knobs.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    issuer: String,
    totp: TotpConfig,
    drift_window: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            totp: TotpConfig::default(),
            drift_window: DEFAULT_DRIFT_WINDOW,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issuer name embedded in provisioning URIs.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_totp(mut self, totp: TotpConfig) -> Self {
        self.totp = totp;
        self
    }

    /// Accepted clock drift, in time steps, on either side of now.
    #[must_use]
    pub fn with_drift_window(mut self, drift_window: u32) -> Self {
        self.drift_window = drift_window;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn totp(&self) -> &TotpConfig {
        &self.totp
    }

    #[must_use]
    pub fn drift_window(&self) -> u32 {
        self.drift_window
    }

    /// Load configuration overrides from `SECONDO_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(issuer) = std::env::var(ENV_ISSUER) {
            if !issuer.trim().is_empty() {
                config.issuer = issuer.trim().to_string();
            }
        }
        let mut totp = TotpConfig::new();
        if let Some(digits) = parse_env(ENV_TOTP_DIGITS) {
            totp = totp.with_digits(digits);
        }
        if let Some(step) = parse_env(ENV_TOTP_STEP_SECONDS) {
            totp = totp.with_step_seconds(step);
        }
        config.totp = totp;
        if let Some(window) = parse_env(ENV_DRIFT_WINDOW) {
            config.drift_window = window;
        }
        config
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

/// Normalize an email for lookup/uniqueness checks.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Orchestrates registration, login, and the second-factor lifecycle.
pub struct AuthService<S, H, T, C = SystemClock, R = OsRandom> {
    store: S,
    hasher: H,
    tokens: T,
    clock: C,
    random: R,
    config: AuthConfig,
}

impl<S, H, T> AuthService<S, H, T>
where
    S: CredentialStore,
    H: PasswordHasher,
    T: TokenIssuer,
{
    pub fn new(store: S, hasher: H, tokens: T, config: AuthConfig) -> Self {
        Self {
            store,
            hasher,
            tokens,
            clock: SystemClock,
            random: OsRandom,
            config,
        }
    }
}

impl<S, H, T, C, R> AuthService<S, H, T, C, R>
where
    S: CredentialStore,
    H: PasswordHasher,
    T: TokenIssuer,
    C: Clock,
    R: RandomSource,
{
    /// Replace the clock, for deterministic window tests.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> AuthService<S, H, T, C2, R> {
        AuthService {
            store: self.store,
            hasher: self.hasher,
            tokens: self.tokens,
            clock,
            random: self.random,
            config: self.config,
        }
    }

    /// Replace the random source, for deterministic enrollment tests.
    pub fn with_random<R2: RandomSource>(self, random: R2) -> AuthService<S, H, T, C, R2> {
        AuthService {
            store: self.store,
            hasher: self.hasher,
            tokens: self.tokens,
            clock: self.clock,
            random,
            config: self.config,
        }
    }

    /// Create a credential record from an email and password.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when the email is taken, `InvalidCredentials` when it
    /// does not look like an email, `Internal` on collaborator failure.
    pub async fn register(&self, email: &str, password: &str) -> Result<RegisteredUser> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(Error::InvalidCredentials);
        }

        let password_hash = self
            .hasher
            .hash(password)
            .context("failed to hash password")?;

        let Some(record) = self.store.create(&email, &password_hash).await? else {
            warn!("registration rejected, email already registered");
            return Err(Error::AlreadyExists);
        };

        info!(user_id = %record.id, "user registered");
        Ok(RegisteredUser {
            id: record.id,
            email: record.email,
        })
    }

    /// First factor: check the password and either finish the login or park
    /// it at the second-factor challenge.
    ///
    /// Unknown-email and wrong-password attempts return the same error kind
    /// and payload, and both pay for one hashing pass, so the responses give
    /// no signal about which accounts exist.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` for any bad email/password pair, `Internal` on
    /// collaborator failure.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome> {
        let email = normalize_email(email);
        let Some(user) = self.store.find_by_email(&email).await? else {
            // Burn a hashing pass so the miss costs as much as a mismatch.
            let _ = self.hasher.hash(password);
            return Err(Error::InvalidCredentials);
        };

        if !self
            .hasher
            .verify(password, &user.password_hash)
            .context("password verification failed")?
        {
            warn!(user_id = %user.id, "login rejected, wrong password");
            return Err(Error::InvalidCredentials);
        }

        if user.two_factor_enabled {
            info!(user_id = %user.id, "password accepted, awaiting second factor");
            return Ok(LoginOutcome::TwoFactorRequired { user_id: user.id });
        }

        let token = self
            .tokens
            .issue(&user, self.clock.now())
            .map_err(|err| Error::Internal(err.into()))?;
        info!(user_id = %user.id, "login completed");
        Ok(LoginOutcome::Authenticated {
            token,
            user: AuthenticatedUser::from(&user),
        })
    }

    /// Second factor: prove a one-time code and mint the session token.
    ///
    /// # Errors
    ///
    /// `TwoFactorNotSetup` when the user has no confirmed second factor,
    /// `InvalidToken` when the code does not verify, `Internal` on
    /// collaborator failure.
    pub async fn complete_two_factor(&self, user_id: Uuid, code: &str) -> Result<TokenGrant> {
        let Some(user) = self.store.find_by_id(user_id).await? else {
            return Err(Error::TwoFactorNotSetup);
        };
        let (true, Some(secret)) = (user.two_factor_enabled, user.totp_secret.as_deref()) else {
            return Err(Error::TwoFactorNotSetup);
        };

        if !self.verify_code(secret, code) {
            warn!(user_id = %user.id, "second factor rejected");
            return Err(Error::InvalidToken);
        }

        let token = self
            .tokens
            .issue(&user, self.clock.now())
            .map_err(|err| Error::Internal(err.into()))?;
        info!(user_id = %user.id, "second factor accepted, login completed");
        Ok(TokenGrant {
            token,
            user: AuthenticatedUser::from(&user),
        })
    }

    /// Start a second-factor enrollment for an already-authenticated user.
    ///
    /// Generates a fresh secret and persists it together with
    /// `two_factor_enabled = false` in one atomic update, so a previously
    /// confirmed secret stops counting the moment it is replaced.
    ///
    /// # Errors
    ///
    /// `Unauthorized` when the user does not exist, `Internal` on
    /// collaborator failure.
    pub async fn enroll(&self, user_id: Uuid) -> Result<Enrollment> {
        let Some(user) = self.store.find_by_id(user_id).await? else {
            return Err(Error::Unauthorized);
        };

        let secret = generate_secret(&self.random).map_err(|err| Error::Internal(err.into()))?;
        let uri = provisioning_uri(&secret, self.config.issuer(), &user.email, self.config.totp())
            .map_err(|err| Error::Internal(err.into()))?;

        let applied = self
            .store
            .update(
                user.id,
                CredentialUpdate {
                    totp_secret: Some(secret.clone()),
                    two_factor_enabled: Some(false),
                    ..CredentialUpdate::default()
                },
            )
            .await?;
        if !applied {
            return Err(Error::Unauthorized);
        }

        info!(user_id = %user.id, "two-factor enrollment started");
        Ok(Enrollment {
            secret,
            provisioning_uri: uri,
        })
    }

    /// Confirm a pending enrollment with a code from the authenticator.
    ///
    /// Success flips `two_factor_enabled` on; failure leaves the stored
    /// secret in place so the user can retry or re-enroll.
    ///
    /// # Errors
    ///
    /// `TwoFactorNotSetup` when no secret is on file, `Internal` on
    /// collaborator failure.
    pub async fn confirm_enrollment(&self, user_id: Uuid, code: &str) -> Result<bool> {
        let Some(user) = self.store.find_by_id(user_id).await? else {
            return Err(Error::TwoFactorNotSetup);
        };
        let Some(secret) = user.totp_secret.as_deref() else {
            return Err(Error::TwoFactorNotSetup);
        };

        if !self.verify_code(secret, code) {
            warn!(user_id = %user.id, "enrollment confirmation rejected");
            return Ok(false);
        }

        self.store
            .update(
                user.id,
                CredentialUpdate {
                    two_factor_enabled: Some(true),
                    ..CredentialUpdate::default()
                },
            )
            .await?;

        info!(user_id = %user.id, "two-factor enrollment confirmed");
        Ok(true)
    }

    /// Check a code against the stored secret without touching enablement.
    /// Used for step-up re-authentication of an existing session.
    ///
    /// # Errors
    ///
    /// `TwoFactorNotSetup` when no secret is on file, `Internal` on
    /// collaborator failure.
    pub async fn validate_two_factor(&self, user_id: Uuid, code: &str) -> Result<bool> {
        let Some(user) = self.store.find_by_id(user_id).await? else {
            return Err(Error::TwoFactorNotSetup);
        };
        let Some(secret) = user.totp_secret.as_deref() else {
            return Err(Error::TwoFactorNotSetup);
        };
        Ok(self.verify_code(secret, code))
    }

    fn verify_code(&self, secret: &str, code: &str) -> bool {
        let now = u64::try_from(self.clock.now()).unwrap_or_default();
        self.config
            .totp()
            .verify_at(secret, code, now, self.config.drift_window())
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthConfig, AuthService, normalize_email, valid_email};
    use crate::clock::Clock;
    use crate::error::Error;
    use crate::password::{Argon2Hasher, PasswordConfig};
    use crate::store::{CredentialStore, MemoryStore};
    use crate::token::{HmacTokenIssuer, TokenIssuer};
    use crate::totp::secret::RandomSource;
    use crate::types::LoginOutcome;
    use uuid::Uuid;

    const NOW: i64 = 1_700_000_000;

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now(&self) -> i64 {
            self.0
        }
    }

    /// Deterministic random source that still varies between calls.
    struct SeqRandom(std::sync::atomic::AtomicU8);

    impl RandomSource for SeqRandom {
        fn fill_bytes(&self, dest: &mut [u8]) -> anyhow::Result<()> {
            let base = self
                .0
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            for (idx, byte) in dest.iter_mut().enumerate() {
                *byte = base.wrapping_add(idx as u8);
            }
            Ok(())
        }
    }

    type TestService =
        AuthService<MemoryStore, Argon2Hasher, HmacTokenIssuer, FixedClock, SeqRandom>;

    fn service() -> TestService {
        AuthService::new(
            MemoryStore::new(),
            Argon2Hasher::new(PasswordConfig::fast()),
            HmacTokenIssuer::new(b"test-signing-key"),
            AuthConfig::new().with_issuer("Secondo Test"),
        )
        .with_clock(FixedClock(NOW))
        .with_random(SeqRandom(std::sync::atomic::AtomicU8::new(1)))
    }

    fn code_for(service_ref: &TestService, secret: &str, time: i64) -> String {
        service_ref
            .config
            .totp()
            .code_at(secret, u64::try_from(time).expect("time"))
            .expect("code")
    }

    /// A six-digit code guaranteed not to verify anywhere in the drift window.
    fn wrong_code_for(service_ref: &TestService, secret: &str) -> String {
        let nearby: Vec<String> = [NOW - 30, NOW, NOW + 30]
            .iter()
            .map(|time| code_for(service_ref, secret, *time))
            .collect();
        ["999999", "999998", "999997", "999996"]
            .iter()
            .find(|candidate| !nearby.iter().any(|code| code == *candidate))
            .expect("distinct code")
            .to_string()
    }

    #[tokio::test]
    async fn register_returns_normalized_identity() {
        let service = service();
        let user = service
            .register("  Alice@Example.COM ", "hunter2hunter2")
            .await
            .expect("register");
        assert_eq!(user.email, "alice@example.com");
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let service = service();
        service
            .register("alice@example.com", "hunter2hunter2")
            .await
            .expect("register");
        let err = service
            .register("ALICE@example.com", "other-password")
            .await
            .expect_err("duplicate");
        assert_eq!(err.kind(), "already_exists");
    }

    #[tokio::test]
    async fn register_rejects_malformed_email() {
        let service = service();
        let err = service
            .register("not-an-email", "hunter2hunter2")
            .await
            .expect_err("malformed");
        assert_eq!(err.kind(), "invalid_credentials");
    }

    #[tokio::test]
    async fn login_without_second_factor_mints_a_token() {
        let service = service();
        service
            .register("alice@example.com", "hunter2hunter2")
            .await
            .expect("register");

        let outcome = service
            .login("alice@example.com", "hunter2hunter2")
            .await
            .expect("login");
        let LoginOutcome::Authenticated { token, user } = outcome else {
            panic!("expected direct authentication");
        };
        assert!(!user.two_factor_enabled);

        let claims = service.tokens.verify(&token, NOW + 1).expect("claims");
        assert_eq!(claims.sub, user.id);
        assert!(!claims.mfa);
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let service = service();
        service
            .register("real@example.com", "hunter2hunter2")
            .await
            .expect("register");

        let unknown = service
            .login("unknown@example.com", "x")
            .await
            .expect_err("unknown email");
        let wrong = service
            .login("real@example.com", "wrongpass")
            .await
            .expect_err("wrong password");

        assert_eq!(unknown.kind(), "invalid_credentials");
        assert_eq!(unknown.kind(), wrong.kind());
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn enrollment_round_trip_enables_and_challenges() {
        let service = service();
        let registered = service
            .register("alice@example.com", "hunter2hunter2")
            .await
            .expect("register");

        let enrollment = service.enroll(registered.id).await.expect("enroll");
        assert!(enrollment
            .provisioning_uri
            .starts_with("otpauth://totp/Secondo%20Test:alice@example.com?"));

        // Not confirmed yet, so login still completes in one step.
        let outcome = service
            .login("alice@example.com", "hunter2hunter2")
            .await
            .expect("login");
        assert!(matches!(outcome, LoginOutcome::Authenticated { .. }));

        let code = code_for(&service, &enrollment.secret, NOW);
        assert!(service
            .confirm_enrollment(registered.id, &code)
            .await
            .expect("confirm"));

        let outcome = service
            .login("alice@example.com", "hunter2hunter2")
            .await
            .expect("login");
        let LoginOutcome::TwoFactorRequired { user_id } = outcome else {
            panic!("expected a second-factor challenge");
        };
        assert_eq!(user_id, registered.id);

        let grant = service
            .complete_two_factor(user_id, &code_for(&service, &enrollment.secret, NOW))
            .await
            .expect("complete");
        let claims = service
            .tokens
            .verify(&grant.token, NOW + 1)
            .expect("claims");
        assert_eq!(claims.sub, registered.id);
        assert!(claims.mfa);
    }

    #[tokio::test]
    async fn re_enrollment_resets_enablement() {
        let service = service();
        let registered = service
            .register("alice@example.com", "hunter2hunter2")
            .await
            .expect("register");

        let first = service.enroll(registered.id).await.expect("enroll");
        let code = code_for(&service, &first.secret, NOW);
        assert!(service
            .confirm_enrollment(registered.id, &code)
            .await
            .expect("confirm"));

        // A new enrollment replaces the secret and drops enablement even
        // before the replacement is confirmed.
        let second = service.enroll(registered.id).await.expect("re-enroll");
        assert_ne!(first.secret, second.secret);
        let record = service
            .store
            .find_by_id(registered.id)
            .await
            .expect("lookup")
            .expect("present");
        assert!(!record.two_factor_enabled);
        assert_eq!(record.totp_secret.as_deref(), Some(second.secret.as_str()));
    }

    #[tokio::test]
    async fn wrong_code_keeps_enrollment_pending() {
        let service = service();
        let registered = service
            .register("alice@example.com", "hunter2hunter2")
            .await
            .expect("register");
        let enrollment = service.enroll(registered.id).await.expect("enroll");

        assert!(!service
            .confirm_enrollment(registered.id, &wrong_code_for(&service, &enrollment.secret))
            .await
            .expect("confirm"));

        let record = service
            .store
            .find_by_id(registered.id)
            .await
            .expect("lookup")
            .expect("present");
        assert!(!record.two_factor_enabled);
        assert_eq!(
            record.totp_secret.as_deref(),
            Some(enrollment.secret.as_str())
        );

        // Retry with the right code still succeeds.
        let code = code_for(&service, &enrollment.secret, NOW);
        assert!(service
            .confirm_enrollment(registered.id, &code)
            .await
            .expect("confirm"));
    }

    #[tokio::test]
    async fn completing_without_enrollment_is_not_setup() {
        let service = service();
        let registered = service
            .register("alice@example.com", "hunter2hunter2")
            .await
            .expect("register");

        let err = service
            .complete_two_factor(registered.id, "123456")
            .await
            .expect_err("no second factor");
        assert_eq!(err.kind(), "two_factor_not_setup");

        let err = service
            .complete_two_factor(Uuid::new_v4(), "123456")
            .await
            .expect_err("unknown user");
        assert_eq!(err.kind(), "two_factor_not_setup");
    }

    #[tokio::test]
    async fn wrong_second_factor_code_is_invalid_token_and_retryable() {
        let service = service();
        let registered = service
            .register("alice@example.com", "hunter2hunter2")
            .await
            .expect("register");
        let enrollment = service.enroll(registered.id).await.expect("enroll");
        let code = code_for(&service, &enrollment.secret, NOW);
        service
            .confirm_enrollment(registered.id, &code)
            .await
            .expect("confirm");

        let err = service
            .complete_two_factor(registered.id, &wrong_code_for(&service, &enrollment.secret))
            .await
            .expect_err("wrong code");
        assert_eq!(err.kind(), "invalid_token");

        // The failed attempt keeps nothing; a correct retry completes.
        assert!(service
            .complete_two_factor(registered.id, &code)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn stale_code_within_one_step_is_accepted() {
        let service = service();
        let registered = service
            .register("alice@example.com", "hunter2hunter2")
            .await
            .expect("register");
        let enrollment = service.enroll(registered.id).await.expect("enroll");
        let confirm = code_for(&service, &enrollment.secret, NOW);
        service
            .confirm_enrollment(registered.id, &confirm)
            .await
            .expect("confirm");

        let stale = code_for(&service, &enrollment.secret, NOW - 30);
        assert!(service
            .complete_two_factor(registered.id, &stale)
            .await
            .is_ok());

        let expired = code_for(&service, &enrollment.secret, NOW - 90);
        let err = service
            .complete_two_factor(registered.id, &expired)
            .await
            .expect_err("expired code");
        assert_eq!(err.kind(), "invalid_token");
    }

    #[tokio::test]
    async fn validate_does_not_mutate_enablement() {
        let service = service();
        let registered = service
            .register("alice@example.com", "hunter2hunter2")
            .await
            .expect("register");
        let enrollment = service.enroll(registered.id).await.expect("enroll");

        let code = code_for(&service, &enrollment.secret, NOW);
        assert!(service
            .validate_two_factor(registered.id, &code)
            .await
            .expect("validate"));

        // Validation is a pure check; enablement still requires confirmation.
        let record = service
            .store
            .find_by_id(registered.id)
            .await
            .expect("lookup")
            .expect("present");
        assert!(!record.two_factor_enabled);
    }

    #[tokio::test]
    async fn enrolling_an_unknown_user_is_unauthorized() {
        let service = service();
        let err = service.enroll(Uuid::new_v4()).await.expect_err("unknown");
        assert_eq!(err.kind(), "unauthorized");
    }

    #[test]
    fn email_helpers_match_expected_shapes() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn config_reads_environment_overrides() {
        temp_env::with_vars(
            [
                (super::ENV_ISSUER, Some("Example Corp")),
                (super::ENV_TOTP_DIGITS, Some("8")),
                (super::ENV_TOTP_STEP_SECONDS, Some("60")),
                (super::ENV_DRIFT_WINDOW, Some("2")),
            ],
            || {
                let config = AuthConfig::from_env();
                assert_eq!(config.issuer(), "Example Corp");
                assert_eq!(config.totp().digits(), 8);
                assert_eq!(config.totp().step_seconds(), 60);
                assert_eq!(config.drift_window(), 2);
            },
        );
    }

    #[test]
    fn config_defaults_without_environment() {
        temp_env::with_vars_unset(
            [
                super::ENV_ISSUER,
                super::ENV_TOTP_DIGITS,
                super::ENV_TOTP_STEP_SECONDS,
                super::ENV_DRIFT_WINDOW,
            ],
            || {
                let config = AuthConfig::from_env();
                assert_eq!(config.issuer(), "secondo");
                assert_eq!(config.totp().digits(), 6);
                assert_eq!(config.totp().step_seconds(), 30);
                assert_eq!(config.drift_window(), 1);
            },
        );
    }
}
