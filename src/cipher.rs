//! Repeating-key XOR text obfuscation.
//!
//! This is casual obfuscation only: no authentication, no secrecy against
//! anyone holding a single plaintext/ciphertext pair. It is applied to text
//! messages, never to audio.

/// Shared secret used to obfuscate text in both directions.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKey(String);

impl CipherKey {
    /// Returns `None` for an empty key.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn apply(&self, text: &str) -> String {
        obfuscate(text, &self.0)
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CipherKey(..)")
    }
}

/// XOR each code point of `text` with the key repeated cyclically.
///
/// Symmetric: applying it twice with the same key restores the input. Fails
/// open: an empty key, or any XOR result that is not a valid `char`
/// (surrogate range or above U+10FFFF), returns `text` unchanged.
pub fn obfuscate(text: &str, key: &str) -> String {
    if key.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    for (c, k) in text.chars().zip(key.chars().cycle()) {
        match char::from_u32(u32::from(c) ^ u32::from(k)) {
            Some(mixed) => out.push(mixed),
            None => return text.to_string(),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_round_trip_ascii() {
        let hidden = obfuscate("hello", "secret");
        assert_ne!(hidden, "hello");
        assert_eq!(obfuscate(&hidden, "secret"), "hello");
    }

    #[test]
    fn test_empty_key_is_identity() {
        assert_eq!(obfuscate("hello", ""), "hello");
    }

    #[test]
    fn test_key_repeats_over_long_text() {
        let text = "a much longer message than the key";
        let hidden = obfuscate(text, "k");
        assert_eq!(hidden.chars().count(), text.chars().count());
        assert_eq!(obfuscate(&hidden, "k"), text);
    }

    #[test]
    fn test_out_of_range_result_fails_open() {
        // 0x100000 ^ 0xF0000 == 0x1F0000, above U+10FFFF.
        let text = "ab\u{100000}";
        assert_eq!(obfuscate(text, "\u{F0000}"), text);
    }

    #[test]
    fn test_surrogate_result_fails_open() {
        // 0xD7FF ^ 0x0F00 == 0xD8FF, a surrogate.
        let text = "\u{D7FF}";
        assert_eq!(obfuscate(text, "\u{0F00}"), text);
    }

    #[test]
    fn test_cipher_key_rejects_empty() {
        assert!(CipherKey::new("").is_none());
        let key = CipherKey::new("pw").unwrap();
        assert_eq!(key.apply(&key.apply("hi there")), "hi there");
        assert_eq!(format!("{:?}", key), "CipherKey(..)");
    }

    proptest! {
        #[test]
        fn prop_obfuscate_is_an_involution(text in ".*", key in ".+") {
            prop_assert_eq!(obfuscate(&obfuscate(&text, &key), &key), text);
        }

        #[test]
        fn prop_empty_key_returns_input(text in ".*") {
            prop_assert_eq!(obfuscate(&text, ""), text);
        }

        #[test]
        fn prop_length_preserved(text in "\\PC*", key in "[a-z]{1,8}") {
            prop_assert_eq!(obfuscate(&text, &key).chars().count(), text.chars().count());
        }
    }
}
