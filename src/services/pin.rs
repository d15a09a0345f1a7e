//! PIN hashing
//!
//! PINs are short, so they get the same Argon2id treatment as passwords:
//! a random salt per hash and the crate's default cost parameters.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Hash a PIN into a PHC string (`$argon2id$...`)
pub fn hash_pin(pin: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash PIN: {}", e))
        .context("PIN hashing failed")?;

    Ok(hash.to_string())
}

/// Verify a PIN against a stored PHC hash.
///
/// A wrong PIN is `Ok(false)`; only a malformed hash is an error.
pub fn verify_pin(pin: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Invalid PIN hash format: {}", e))
        .context("Failed to parse PIN hash")?;

    match Argon2::default().verify_password(pin.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("PIN verification failed: {}", e))
            .context("PIN verification error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_pin_uses_argon2id() {
        let hash = hash_pin("1234").expect("Failed to hash PIN");
        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("1234"));
    }

    #[test]
    fn test_same_pin_hashes_differently() {
        let a = hash_pin("1234").unwrap();
        let b = hash_pin("1234").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_pin() {
        let hash = hash_pin("998877").unwrap();
        assert!(verify_pin("998877", &hash).unwrap());
        assert!(!verify_pin("998878", &hash).unwrap());
    }

    #[test]
    fn test_verify_pin_invalid_hash() {
        assert!(verify_pin("1234", "not-a-hash").is_err());
    }
}
