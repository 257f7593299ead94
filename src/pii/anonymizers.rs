//! Anonymization strategies.
//!
//! All strategies are one-way. Tokenization produces a stable
//! pseudonym (the same input always yields the same token) without
//! keeping a reverse mapping.

use sha2::{Digest, Sha256};

use super::{AnonymizationMethod, Anonymizer};

/// Full SHA-256 of the value, hex-encoded (64 chars).
pub struct HashAnonymizer;

impl Anonymizer for HashAnonymizer {
    fn method(&self) -> AnonymizationMethod {
        AnonymizationMethod::Hash
    }

    fn anonymize(&self, value: &str) -> String {
        let digest = Sha256::digest(value.as_bytes());
        hex::encode(digest)
    }
}

/// Stable pseudonym: `TKN_` plus the first 8 bytes of the SHA-256
/// digest, hex-encoded.
pub struct TokenizeAnonymizer;

impl Anonymizer for TokenizeAnonymizer {
    fn method(&self) -> AnonymizationMethod {
        AnonymizationMethod::Tokenize
    }

    fn anonymize(&self, value: &str) -> String {
        let digest = Sha256::digest(value.as_bytes());
        format!("TKN_{}", hex::encode(&digest[..8]))
    }
}

/// Keep the first and last two characters, star the middle. Values of
/// four characters or fewer are fully starred.
pub struct RedactAnonymizer;

impl Anonymizer for RedactAnonymizer {
    fn method(&self) -> AnonymizationMethod {
        AnonymizationMethod::Redact
    }

    fn anonymize(&self, value: &str) -> String {
        let chars: Vec<char> = value.chars().collect();
        if chars.len() <= 4 {
            return "****".to_string();
        }
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{}{}{}", head, "*".repeat(chars.len() - 4), tail)
    }
}

/// Keep only the first character. Values of three characters or fewer
/// collapse to `***`.
pub struct GeneralizeAnonymizer;

impl Anonymizer for GeneralizeAnonymizer {
    fn method(&self) -> AnonymizationMethod {
        AnonymizationMethod::Generalize
    }

    fn anonymize(&self, value: &str) -> String {
        let chars: Vec<char> = value.chars().collect();
        if chars.len() <= 3 {
            return "***".to_string();
        }
        format!("{}{}", chars[0], "*".repeat(chars.len() - 1))
    }
}
