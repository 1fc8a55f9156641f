//! Owner passphrase hashing.
//!
//! Passphrases are stored as Argon2id PHC strings. Stored values that do not
//! carry the `$argon2` prefix predate hashing and are compared as plaintext,
//! but only while the legacy switch is on.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use sha2::{Digest, Sha256};
use tracing::{error, warn};

const ARGON2_PREFIX: &str = "$argon2";

pub const DEFAULT_MEMORY_KIB: u32 = 19 * 1024;
pub const DEFAULT_ITERATIONS: u32 = 2;
pub const DEFAULT_PARALLELISM: u32 = 1;

/// Work factor and compatibility settings for [`SecretHasher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashPolicy {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
    legacy_plaintext: bool,
}

impl Default for HashPolicy {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: DEFAULT_ITERATIONS,
            parallelism: DEFAULT_PARALLELISM,
            legacy_plaintext: true,
        }
    }
}

impl HashPolicy {
    #[must_use]
    pub fn with_memory_kib(mut self, memory_kib: u32) -> Self {
        self.memory_kib = memory_kib;
        self
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    #[must_use]
    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = parallelism;
        self
    }

    #[must_use]
    pub fn with_legacy_plaintext(mut self, enabled: bool) -> Self {
        self.legacy_plaintext = enabled;
        self
    }

    #[must_use]
    pub fn legacy_plaintext(&self) -> bool {
        self.legacy_plaintext
    }
}

/// Returns true when a stored value is not an Argon2 hash.
#[must_use]
pub fn is_legacy_plaintext(stored: &str) -> bool {
    !stored.starts_with(ARGON2_PREFIX)
}

#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
    legacy_plaintext: bool,
}

impl std::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHasher")
            .field("legacy_plaintext", &self.legacy_plaintext)
            .finish_non_exhaustive()
    }
}

impl SecretHasher {
    /// Build a hasher from a policy.
    ///
    /// # Errors
    /// Returns an error if the Argon2 parameters are out of range.
    pub fn new(policy: HashPolicy) -> Result<Self> {
        let params = Params::new(
            policy.memory_kib,
            policy.iterations,
            policy.parallelism,
            None,
        )
        .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            legacy_plaintext: policy.legacy_plaintext,
        })
    }

    /// Hash a secret with a fresh random salt.
    ///
    /// # Errors
    /// Returns an error if Argon2 fails to produce a hash.
    pub fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| anyhow!("failed to hash secret: {err}"))
    }

    /// Check a secret against a stored value. Never errors.
    #[must_use]
    pub fn verify(&self, secret: &str, stored: &str) -> bool {
        if !is_legacy_plaintext(stored) {
            return PasswordHash::new(stored).is_ok_and(|parsed| {
                self.argon2
                    .verify_password(secret.as_bytes(), &parsed)
                    .is_ok()
            });
        }

        if !self.legacy_plaintext {
            warn!("Rejected legacy plaintext secret: legacy comparison is disabled");
            return false;
        }

        warn!("Verifying legacy plaintext secret; run `migrate-secrets` to rehash");
        // Compare digests so timing does not depend on the common prefix.
        Sha256::digest(stored.as_bytes()) == Sha256::digest(secret.as_bytes())
    }

    /// [`Self::hash`] on the blocking pool.
    ///
    /// # Errors
    /// Returns an error if hashing fails or the blocking task panics.
    pub async fn hash_blocking(&self, secret: String) -> Result<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .context("secret hashing task failed")?
    }

    /// [`Self::verify`] on the blocking pool.
    pub async fn verify_blocking(&self, secret: String, stored: String) -> bool {
        let hasher = self.clone();
        match tokio::task::spawn_blocking(move || hasher.verify(&secret, &stored)).await {
            Ok(valid) => valid,
            Err(err) => {
                error!("secret verification task failed: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher(legacy: bool) -> Result<SecretHasher> {
        SecretHasher::new(
            HashPolicy::default()
                .with_memory_kib(1024)
                .with_iterations(1)
                .with_legacy_plaintext(legacy),
        )
    }

    #[test]
    fn hash_then_verify_round_trips() -> Result<()> {
        let hasher = fast_hasher(false)?;
        for secret in ["s3cret!!", "correct horse battery staple", &"x".repeat(128)] {
            let hashed = hasher.hash(secret)?;
            assert!(hashed.starts_with("$argon2id$"));
            assert!(hasher.verify(secret, &hashed));
        }
        Ok(())
    }

    #[test]
    fn verify_rejects_other_secret() -> Result<()> {
        let hasher = fast_hasher(false)?;
        let hashed = hasher.hash("s3cret!!")?;
        assert!(!hasher.verify("s3cret!?", &hashed));
        assert!(!hasher.verify("", &hashed));
        Ok(())
    }

    #[test]
    fn hash_is_salted() -> Result<()> {
        let hasher = fast_hasher(false)?;
        assert_ne!(hasher.hash("same")?, hasher.hash("same")?);
        Ok(())
    }

    #[test]
    fn verify_uses_params_embedded_in_hash() -> Result<()> {
        let weak = fast_hasher(false)?;
        let strong = SecretHasher::new(HashPolicy::default().with_memory_kib(2048))?;
        let hashed = weak.hash("s3cret!!")?;
        assert!(strong.verify("s3cret!!", &hashed));
        Ok(())
    }

    #[test]
    fn legacy_plaintext_only_when_enabled() -> Result<()> {
        assert!(fast_hasher(true)?.verify("plain-pass", "plain-pass"));
        assert!(!fast_hasher(true)?.verify("other", "plain-pass"));
        assert!(!fast_hasher(false)?.verify("plain-pass", "plain-pass"));
        Ok(())
    }

    #[test]
    fn malformed_argon2_string_is_rejected() -> Result<()> {
        let hasher = fast_hasher(true)?;
        assert!(!hasher.verify("$argon2id$garbage", "$argon2id$garbage"));
        Ok(())
    }

    #[test]
    fn invalid_params_fail_construction() {
        assert!(SecretHasher::new(HashPolicy::default().with_iterations(0)).is_err());
    }

    #[tokio::test]
    async fn blocking_variants_agree() -> Result<()> {
        let hasher = fast_hasher(false)?;
        let hashed = hasher.hash_blocking("s3cret!!".to_string()).await?;
        assert!(
            hasher
                .verify_blocking("s3cret!!".to_string(), hashed.clone())
                .await
        );
        assert!(!hasher.verify_blocking("nope".to_string(), hashed).await);
        Ok(())
    }
}
