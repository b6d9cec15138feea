//! API-key and claim-voucher token generation and verification.
//!
//! Agents authenticate with an `(X-API-Key, X-Agent-ID)` header pair (§4.2).
//! Only the SHA-256 hash of a key is ever persisted; comparisons against the
//! stored hash happen in constant time so a timing side-channel can't be used
//! to recover a valid key byte-by-byte.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ApiKeyError {
    #[error("failed to generate random token")]
    Rng,
}

/// A freshly minted token and its hash, as returned to the caller once. Only
/// `hash` is ever stored; `plaintext` is shown to the operator/agent exactly
/// once and then discarded.
pub struct IssuedToken {
    pub plaintext: String,
    pub hash: String,
}

/// Generate a new random token (used for both agent API keys and claim
/// vouchers) and its hash.
pub fn generate_token() -> Result<IssuedToken, ApiKeyError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; TOKEN_BYTES];
    rng.fill(&mut bytes).map_err(|_| ApiKeyError::Rng)?;
    let plaintext = URL_SAFE_NO_PAD.encode(bytes);
    let hash = hash_token(&plaintext);
    Ok(IssuedToken { plaintext, hash })
}

/// Hex-encoded SHA-256 of a token, as stored in `agent.api_key_hash` /
/// `claim_voucher.token_hash`.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Constant-time comparison between a presented token's hash and the stored
/// hash, so an attacker timing the comparison can't learn which prefix bytes
/// matched.
pub fn verify_token(presented: &str, stored_hash: &str) -> bool {
    let presented_hash = hash_token(presented);
    presented_hash.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{:02x}", b).expect("writing to String never fails");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_verifies() {
        let issued = generate_token().unwrap();
        assert!(verify_token(&issued.plaintext, &issued.hash));
    }

    #[test]
    fn wrong_token_fails() {
        let issued = generate_token().unwrap();
        assert!(!verify_token("not-the-token", &issued.hash));
    }

    #[test]
    fn two_tokens_differ() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_ne!(a.plaintext, b.plaintext);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn hash_is_deterministic() {
        let issued = generate_token().unwrap();
        assert_eq!(hash_token(&issued.plaintext), issued.hash);
    }
}
