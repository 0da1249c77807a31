use anyhow::{anyhow, Result};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use rand::RngCore;

/// Checks login credentials against whatever owns user accounts.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Returns the user id when `password` matches the account for `email`.
    async fn verify_credentials(&self, email: &str, password: &str) -> Option<u64>;
}

/// Argon2 password hash in PHC string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordDigest(String);

impl PasswordDigest {
    pub fn create(password: &str) -> Result<Self> {
        let salt = salt()?;
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| anyhow!("hashing password: {err}"))?;
        Ok(Self(hash.to_string()))
    }

    pub fn verify(&self, password: &str) -> bool {
        PasswordHash::new(&self.0)
            .map(|hash| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &hash)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn salt() -> Result<SaltString> {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    SaltString::encode_b64(&bytes).map_err(|err| anyhow!("encoding salt: {err}"))
}
