//! Process password hashing.
//!
//! Secrets are stored as Argon2id PHC strings with a random 16-byte salt.
//! Verification reads the cost parameters back from the stored string, so
//! changing [`HashingParams`] never invalidates existing secrets. The
//! comparison inside `argon2` is constant-time.

use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

use crate::config::HashingParams;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hashing parameters: {0}")]
    Params(String),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("stored secret is not a valid PHC string: {0}")]
    Malformed(String),

    #[error("hashing task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
pub struct SecretHasher {
    params: Params,
}

impl SecretHasher {
    pub fn new(params: HashingParams) -> Result<Self, HashError> {
        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            None,
        )
        .map_err(|e| HashError::Params(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, password: &str) -> Result<String, HashError> {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = SaltString::encode_b64(&salt).map_err(|e| HashError::Hash(e.to_string()))?;
        let hash = self
            .argon()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| HashError::Hash(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// `Ok(false)` for a wrong password; `Err` only when the stored secret
    /// or the hasher itself is broken.
    pub fn verify(&self, candidate: &str, stored: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(stored).map_err(|e| HashError::Malformed(e.to_string()))?;
        match self.argon().verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(HashError::Hash(e.to_string())),
        }
    }

    /// [`SecretHasher::hash`] on the blocking pool.
    pub async fn hash_blocking(&self, password: String) -> Result<String, HashError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| HashError::Task(e.to_string()))?
    }

    /// [`SecretHasher::verify`] on the blocking pool.
    pub async fn verify_blocking(&self, candidate: String, stored: String) -> Result<bool, HashError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&candidate, &stored))
            .await
            .map_err(|e| HashError::Task(e.to_string()))?
    }
}
