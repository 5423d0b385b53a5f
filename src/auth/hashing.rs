//! Credential hashing
//!
//! PBKDF2-HMAC-SHA256 with one system-wide salt. The lookup is by hash, so
//! the function must be deterministic; the iteration count keeps offline
//! guessing of a leaked hash expensive while staying cheap enough for every
//! request.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::sync::Arc;

const HASH_LEN: usize = 32;

#[derive(Clone)]
pub struct CredentialHasher {
    salt: Arc<str>,
    iterations: u32,
}

impl CredentialHasher {
    pub fn new(salt: &str, iterations: u32) -> Self {
        Self {
            salt: Arc::from(salt),
            iterations: iterations.max(1),
        }
    }

    /// Hex-encoded derived key
    pub fn hash(&self, token: &str) -> String {
        let mut out = [0u8; HASH_LEN];
        pbkdf2_hmac::<Sha256>(token.as_bytes(), self.salt.as_bytes(), self.iterations, &mut out);
        hex::encode(out)
    }
}

impl std::fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHasher")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}
