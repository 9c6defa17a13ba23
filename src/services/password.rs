//! Password hashing
//!
//! Argon2id hashing and verification. Each hash gets a fresh random salt and
//! is stored as a PHC string, which embeds the algorithm, cost parameters and
//! salt. Verification reads those parameters back from the stored string, so
//! changing the configured cost only affects new hashes.
//!
//! Hashing is CPU bound; the `*_blocking` variants move it onto tokio's
//! blocking pool so request handlers don't stall the async workers.

use std::sync::Arc;

use anyhow::{Context, Result};
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use once_cell::sync::OnceCell;

use crate::config::PasswordConfig;

/// Argon2id hasher configured with the service's cost parameters
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    /// Hash of a throwaway secret, verified against when the username is unknown
    dummy: Arc<OnceCell<String>>,
}

impl PasswordHasher {
    /// Build a hasher from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if argon2 rejects the cost parameters.
    pub fn new(config: &PasswordConfig) -> Result<Self> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("Invalid argon2 parameters: {}", e))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            dummy: Arc::new(OnceCell::new()),
        })
    }

    /// Hash a password, returning a PHC string.
    ///
    /// ```ignore
    /// let hasher = PasswordHasher::new(&PasswordConfig::default())?;
    /// let hash = hasher.hash("pw123")?;
    /// assert!(hash.starts_with("$argon2id$"));
    /// ```
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

        Ok(password_hash.to_string())
    }

    /// Verify a password against a stored hash.
    ///
    /// Returns `Ok(false)` on mismatch and an error only when the stored hash
    /// cannot be parsed or verification itself fails.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(anyhow::anyhow!("Password verification failed: {}", e)),
        }
    }

    /// Spend the same work as a real verification, discarding the outcome.
    pub fn verify_dummy(&self, password: &str) -> Result<()> {
        let dummy = self
            .dummy
            .get_or_try_init(|| self.hash("playopia-dummy-secret"))?;
        self.verify(password, dummy)?;
        Ok(())
    }

    /// [`PasswordHasher::hash`] on the blocking thread pool
    pub async fn hash_blocking(&self, password: String) -> Result<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .context("Password hashing task failed")?
    }

    /// [`PasswordHasher::verify`] on the blocking thread pool
    pub async fn verify_blocking(&self, password: String, hash: String) -> Result<bool> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .context("Password verification task failed")?
    }

    /// [`PasswordHasher::verify_dummy`] on the blocking thread pool
    pub async fn verify_dummy_blocking(&self, password: String) -> Result<()> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify_dummy(&password))
            .await
            .context("Password verification task failed")?
    }
}
