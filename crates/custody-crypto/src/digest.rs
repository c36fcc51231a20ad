//! SHA-256 fingerprints of plaintext evidence

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data` (64 chars).
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compare two hex digests. Case-insensitive; surrounding whitespace is ignored.
pub fn digests_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    a.len() == b.len() && a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            sha256_hex(b"0123456789"),
            "84d89877f0d4041efb6bf91a16f0248f2fd573e6af05c19f96bedb9f882f7882"
        );
    }

    #[test]
    fn match_is_case_insensitive() {
        let h = sha256_hex(b"evidence");
        assert!(digests_match(&h, &h.to_uppercase()));
        assert!(!digests_match(&h, &sha256_hex(b"evidencE")));
        assert!(!digests_match(&h, &h[..63]));
    }
}
