use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::error;

use crate::config::HasherConfig;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid argon2 parameters: {0}")]
    Params(String),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("stored password hash is malformed: {0}")]
    MalformedDigest(String),

    #[error("hashing task failed: {0}")]
    Task(String),
}

/// Argon2id hasher with a fixed cost.
///
/// `hash_password` / `verify_password` are CPU bound; async callers use
/// [`CredentialHasher::hash`] and [`CredentialHasher::verify`], which run them
/// on the blocking pool.
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
}

impl CredentialHasher {
    pub fn new(cfg: &HasherConfig) -> Result<Self, HashError> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| HashError::Params(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash_password(&self, plain: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                HashError::Hash(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// `Ok(false)` on mismatch; `Err` only when the stored digest cannot be parsed.
    pub fn verify_password(&self, digest: &str, plain: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(digest).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            HashError::MalformedDigest(e.to_string())
        })?;
        // Parameters come from the PHC string, so digests made under an older cost still verify.
        Ok(self
            .argon2
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }

    pub async fn hash(&self, plain: String) -> Result<String, HashError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash_password(&plain))
            .await
            .map_err(|e| HashError::Task(e.to_string()))?
    }

    pub async fn verify(&self, digest: String, plain: String) -> Result<bool, HashError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify_password(&digest, &plain))
            .await
            .map_err(|e| HashError::Task(e.to_string()))?
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> CredentialHasher {
    CredentialHasher::new(&HasherConfig {
        memory_kib: 256,
        iterations: 1,
        parallelism: 1,
    })
    .expect("cheap params are valid")
}
