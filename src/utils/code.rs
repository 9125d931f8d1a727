// src/utils/code.rs

use std::{ops::RangeInclusive, sync::LazyLock};

use rand::{Rng, RngCore, rngs::OsRng};
use regex::Regex;
use subtle::ConstantTimeEq;

/// Late-code alphabet. 0/O and 1/I are left out so codes survive being read aloud.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Lengths a late code may have, both when issued and when validated.
pub const LATE_CODE_LENGTHS: RangeInclusive<usize> = 4..=32;

static CODE_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^[A-Z0-9]{{{},{}}}$",
        LATE_CODE_LENGTHS.start(),
        LATE_CODE_LENGTHS.end()
    ))
    .expect("late code pattern is valid")
});

/// Generates a random late code of `len` characters.
pub fn generate_late_code(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Trims and uppercases a user-entered code.
pub fn normalize_late_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Whether a normalized code could have been issued at all.
pub fn is_well_formed_late_code(code: &str) -> bool {
    CODE_FORMAT.is_match(code)
}

/// Generates a 256-bit resume token, hex encoded.
pub fn generate_resume_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Compares two secrets in constant time.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_code_shape() {
        for _ in 0..50 {
            let code = generate_late_code(8);
            assert_eq!(code.len(), 8);
            assert!(code.bytes().all(|c| CODE_ALPHABET.contains(&c)));
            assert!(is_well_formed_late_code(&code));
        }
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_late_code("  ab12cd34 \n"), "AB12CD34");
        assert!(is_well_formed_late_code(&normalize_late_code(" ab12cd34 ")));
        assert!(!is_well_formed_late_code("AB-12"));
        assert!(!is_well_formed_late_code(""));
        assert!(!is_well_formed_late_code("ABC"));
        assert!(is_well_formed_late_code("ABCD"));
        assert!(is_well_formed_late_code(&"A".repeat(32)));
        assert!(!is_well_formed_late_code(&"A".repeat(33)));
    }

    #[test]
    fn test_resume_token() {
        let a = generate_resume_token();
        let b = generate_resume_token();
        assert_eq!(a.len(), 64);
        assert!(hex::decode(&a).is_ok_and(|bytes| bytes.len() == 32));
        assert_ne!(a, b);
        assert!(constant_time_eq(&a, &a.clone()));
        assert!(!constant_time_eq(&a, &b));
        assert!(!constant_time_eq(&a, "short"));
    }
}
