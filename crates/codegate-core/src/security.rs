use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::domain::UserId;

/// Length of generated access codes and session ids (~256 bits of entropy).
pub const TOKEN_LEN: usize = 43;

// ============== Authorization ==============

pub fn is_admin(user_id: Option<UserId>, admin_user_ids: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    if admin_user_ids.is_empty() {
        return false;
    }
    admin_user_ids.contains(&user_id.0)
}

/// Compare a presented API key against the configured shared secret.
///
/// Both sides are hashed first so the comparison runs over fixed-size digests.
pub fn verify_api_key(presented: Option<&str>, secret: &str) -> bool {
    let Some(presented) = presented else {
        return false;
    };
    if secret.is_empty() {
        return false;
    }
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(secret.as_bytes());
    bool::from(a.as_slice().ct_eq(b.as_slice()))
}

// ============== Tokens ==============

/// URL-safe random token from the OS RNG.
pub fn generate_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Short, non-reversible token fingerprint for logs.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(len);
    for b in bytes {
        let _ = write!(&mut out, "{:02x}", b);
        if out.len() >= len {
            break;
        }
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_requires_listed_user() {
        assert!(is_admin(Some(UserId(7)), &[1, 7]));
        assert!(!is_admin(Some(UserId(8)), &[1, 7]));
        assert!(!is_admin(None, &[1, 7]));
        assert!(!is_admin(Some(UserId(1)), &[]));
    }

    #[test]
    fn api_key_must_match_exactly() {
        assert!(verify_api_key(Some("s3cret"), "s3cret"));
        assert!(!verify_api_key(Some("s3cret "), "s3cret"));
        assert!(!verify_api_key(None, "s3cret"));
        assert!(!verify_api_key(Some(""), ""));
    }

    #[test]
    fn api_key_rejects_prefix_and_same_length_mismatch() {
        assert!(!verify_api_key(Some("s3cre"), "s3cret"));
        assert!(!verify_api_key(Some("s3creT"), "s3cret"));
        assert!(!verify_api_key(Some("s3cret"), ""));
    }

    #[test]
    fn tokens_are_long_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_is_stable_hex_prefix() {
        let f = fingerprint("abc");
        assert_eq!(f.len(), 16);
        assert_eq!(f, fingerprint("abc"));
        assert_eq!(f, "ba7816bf8f01cfea");
    }
}
