use std::sync::Arc;

use rand::Rng;

use crate::Result;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Length of the plain cluster secret handed out at creation.
pub const CLUSTER_SECRET_LEN: usize = 32;
/// Hex length of a cluster unique id.
pub const CLUSTER_UNIQUE_ID_LEN: usize = 32;
/// Hex length of a server DNS name.
pub const SERVER_DNS_NAME_LEN: usize = 8;
/// Attempts made before a unique-value loop gives up.
pub const MAX_UNIQUE_ATTEMPTS: usize = 16;

/// Generate a random alphanumeric secret.
pub fn generate_token(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Hash a secret using argon2id and a pepper.
pub fn hash_token(token: &str, pepper: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let password = format!("{token}{pepper}");
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("failed to hash token: {}", err))?
        .to_string())
}

/// Check a presented secret against a stored argon2 hash. Unparsable hashes
/// never match.
pub fn verify_token(token: &str, stored_hash: &str, pepper: &str) -> bool {
    let password = format!("{token}{pepper}");
    let Ok(password_hash) = PasswordHash::new(stored_hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &password_hash)
        .is_ok()
}

/// Source of candidate values for unique columns (cluster ids, server DNS
/// names). Callers retry with a fresh candidate until one is unused.
pub trait UniqueValueSource: Send + Sync + 'static {
    fn next_hex(&self, len: usize) -> String;
}

pub type UniqueValueSourceRef = Arc<dyn UniqueValueSource>;

/// Default source backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomHex;

impl UniqueValueSource for RandomHex {
    fn next_hex(&self, len: usize) -> String {
        const HEX: &[u8] = b"0123456789abcdef";
        let mut rng = rand::rng();
        (0..len)
            .map(|_| HEX[rng.random_range(0..HEX.len())] as char)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_use_requested_length() {
        let token = generate_token(CLUSTER_SECRET_LEN);
        assert_eq!(token.len(), CLUSTER_SECRET_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token(CLUSTER_SECRET_LEN));
    }

    #[test]
    fn hashed_tokens_verify_only_with_same_pepper() {
        let hash = hash_token("s3cret", "pepper").expect("hash");
        assert!(verify_token("s3cret", &hash, "pepper"));
        assert!(!verify_token("s3cret", &hash, "other"));
        assert!(!verify_token("wrong", &hash, "pepper"));
        assert!(!verify_token("s3cret", "not-a-hash", "pepper"));
    }

    #[test]
    fn random_hex_is_lowercase_hex() {
        let value = RandomHex.next_hex(SERVER_DNS_NAME_LEN);
        assert_eq!(value.len(), SERVER_DNS_NAME_LEN);
        assert!(value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }
}
