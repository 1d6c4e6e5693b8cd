//! Content keys for anonymous templates.
//!
//! Templates supplied as literal text have no name of their own. The service
//! derives one from the text so that repeated renders of the same body share
//! a single overlay entry and a single compiled template.
//!
//! [`Sha256Hasher`] is the default: a SHA-256 digest truncated to 128 bits and
//! hex encoded, giving a 32 character key. [`RawTextKey`] uses the text itself
//! as the key and must be selected explicitly; the service never falls back
//! to it on its own.

use sha2::{Digest, Sha256};

/// Length in bytes of the digest prefix kept for keys.
const KEY_BYTES: usize = 16;

/// Raised when a hasher cannot produce a key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no digest available for anonymous template keys: {reason}")]
pub struct HashingUnavailable {
    /// Why the digest could not be obtained.
    pub reason: String,
}

impl HashingUnavailable {
    /// Create the error with a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Derives overlay keys from template text.
///
/// Implementations must be deterministic: the same text always yields the
/// same key for the lifetime of the process.
pub trait ContentHasher: Send + Sync {
    /// Compute the key for `text`.
    fn key(&self, text: &str) -> Result<String, HashingUnavailable>;
}

/// Blanket implementation so closures can act as hashers.
impl<F> ContentHasher for F
where
    F: Fn(&str) -> Result<String, HashingUnavailable> + Send + Sync,
{
    fn key(&self, text: &str) -> Result<String, HashingUnavailable> {
        (self)(text)
    }
}

/// SHA-256 based hasher producing 32 lowercase hex characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn key(&self, text: &str) -> Result<String, HashingUnavailable> {
        let digest = Sha256::digest(text.as_bytes());
        Ok(to_hex(&digest[..KEY_BYTES]))
    }
}

/// Uses the template text itself as its key.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawTextKey;

impl ContentHasher for RawTextKey {
    fn key(&self, text: &str) -> Result<String, HashingUnavailable> {
        Ok(text.to_string())
    }
}

fn to_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sha256_key_is_fixed_length_hex() {
        let key = Sha256Hasher.key("Hello {{ name }}").unwrap();
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_sha256_known_vector() {
        // sha256("abc") = ba7816bf8f01cfea414140de5dae2223...
        let key = Sha256Hasher.key("abc").unwrap();
        assert_eq!(key, "ba7816bf8f01cfea414140de5dae2223");
    }

    #[test]
    fn test_sha256_distinguishes_bodies() {
        let a = Sha256Hasher.key("<p>${a}</p>").unwrap();
        let b = Sha256Hasher.key("<p>${b}</p>").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_raw_text_key() {
        assert_eq!(RawTextKey.key("{{ x }}").unwrap(), "{{ x }}");
    }

    #[test]
    fn test_closure_hasher_can_fail() {
        let hasher = |_: &str| -> Result<String, HashingUnavailable> {
            Err(HashingUnavailable::new("digest disabled"))
        };
        let err = hasher.key("anything").unwrap_err();
        assert!(err.to_string().contains("digest disabled"));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0x0f, 0xa0, 0xff]), "000fa0ff");
    }

    proptest! {
        #[test]
        fn prop_sha256_is_deterministic(text in ".*") {
            let first = Sha256Hasher.key(&text).unwrap();
            let second = Sha256Hasher.key(&text).unwrap();
            prop_assert_eq!(first.len(), 32);
            prop_assert_eq!(first, second);
        }
    }
}
