//! Password hashing
//!
//! Argon2id with the crate's default parameters and a fresh random salt per
//! hash. Stored hashes are PHC strings, so parameters travel with the hash.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Salt length in bytes (the recommended 16)
const SALT_LEN: usize = 16;

/// Hash a plaintext password into a PHC string.
///
/// # Errors
///
/// Returns an error if the hasher rejects the input
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; SALT_LEN];
    getrandom::fill(&mut salt_bytes)
        .map_err(|e| anyhow::anyhow!("Failed to gather salt entropy: {}", e))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| anyhow::anyhow!("Failed to encode salt: {}", e))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    Ok(hash.to_string())
}

/// Check a plaintext password against a stored PHC hash.
///
/// A mismatch is `Ok(false)`; only a malformed hash or a hasher failure is
/// an error.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))
        .context("Failed to parse stored password hash")?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Password verification failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_argon2id_and_salted() {
        let first = hash_password("admin123").expect("hash");
        let second = hash_password("admin123").expect("hash");

        assert!(first.starts_with("$argon2id$"));
        assert_ne!(first, second, "each hash gets its own salt");
        assert!(!first.contains("admin123"));

        let parsed = PasswordHash::new(&first).unwrap();
        assert_eq!(parsed.salt.map(|s| s.as_str().len()), Some(22));
    }

    #[test]
    fn test_verify_round_trip() {
        let hash = hash_password("correct horse").expect("hash");

        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(verify_password("anything", "$2a$10$not-an-argon-hash").is_err());
        assert!(verify_password("anything", "").is_err());
    }
}
