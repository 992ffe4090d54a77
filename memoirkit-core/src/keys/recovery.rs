//! Recovery password generation.

use rand::{rngs::OsRng, seq::SliceRandom};

/// Consonants for pronounceable segments, without `l`, `q` and `x`.
const CONSONANTS: &[u8] = b"bcdfghjkmnprstvwz";

/// Vowels for pronounceable segments.
const VOWELS: &[u8] = b"aeiou";

/// Digits without `0` and `1`.
const DIGITS: &[u8] = b"23456789";

/// 55 symbols with no look-alikes (`0 O o 1 l I i`).
const UNAMBIGUOUS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";

const SEGMENTS: usize = 4;
const RANDOM_LENGTH: usize = 24;

/// Generates a recovery password from the OS CSPRNG.
///
/// Pronounceable passwords are four consonant-vowel-consonant-digit segments
/// joined by `-` (e.g. `bak7-tum3-ros9-wen4`), easy to read aloud or write
/// down. Otherwise 24 characters are drawn uniformly from a 55-symbol
/// unambiguous alphabet.
#[must_use]
pub fn generate_recovery_password(pronounceable: bool) -> String {
    let mut rng = OsRng;
    if pronounceable {
        let segments: Vec<String> = (0..SEGMENTS)
            .map(|_| {
                [CONSONANTS, VOWELS, CONSONANTS, DIGITS]
                    .iter()
                    .filter_map(|alphabet| alphabet.choose(&mut rng))
                    .map(|&byte| char::from(byte))
                    .collect()
            })
            .collect();
        segments.join("-")
    } else {
        (0..RANDOM_LENGTH)
            .filter_map(|_| UNAMBIGUOUS.choose(&mut rng))
            .map(|&byte| char::from(byte))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphabet_sizes() {
        assert_eq!(UNAMBIGUOUS.len(), 55);
        assert!(!CONSONANTS.iter().any(|c| b"lqx".contains(c)));
        assert!(!DIGITS.iter().any(|c| b"01".contains(c)));
    }

    #[test]
    fn test_pronounceable_shape() {
        for _ in 0..50 {
            let password = generate_recovery_password(true);
            let segments: Vec<&str> = password.split('-').collect();
            assert_eq!(segments.len(), 4, "{password}");
            for segment in segments {
                let bytes = segment.as_bytes();
                assert_eq!(bytes.len(), 4);
                assert!(CONSONANTS.contains(&bytes[0]));
                assert!(VOWELS.contains(&bytes[1]));
                assert!(CONSONANTS.contains(&bytes[2]));
                assert!(DIGITS.contains(&bytes[3]));
            }
        }
    }

    #[test]
    fn test_random_shape() {
        let password = generate_recovery_password(false);
        assert_eq!(password.len(), 24);
        assert!(password.bytes().all(|b| UNAMBIGUOUS.contains(&b)));
        assert_ne!(password, generate_recovery_password(false));
    }
}
