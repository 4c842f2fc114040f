//! Credential generation.
//!
//! Usernames are memorable adjective_noun_NNN identifiers; passwords are
//! random strings drawn from a charset the target engine accepts. Some
//! engines reject shell-hostile symbols in passwords that end up inside
//! exec'd command lines, so each adapter declares its constraint.

use rand::{seq::SliceRandom, Rng};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const ADJECTIVES: &[&str] = &[
    "quick", "lazy", "happy", "clever", "brave", "calm", "wise", "bold", "bright", "cool", "fair",
    "fine", "free", "kind", "neat", "pure", "rare", "real", "rich", "safe", "soft", "tall", "warm",
    "wild", "blue", "dark", "deep", "easy", "even", "fast", "good", "high",
];

const NOUNS: &[&str] = &[
    "fox", "cat", "dog", "owl", "lion", "bear", "wolf", "tiger", "eagle", "hawk", "raven", "crane",
    "swan", "dove", "crow", "lark", "river", "mountain", "ocean", "forest", "meadow", "valley",
    "peak", "lake", "star", "moon", "sun", "cloud", "wind", "rain", "snow", "storm",
];

const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";

/// Symbols safe to pass through `podman exec` argument lists unquoted.
const SYMBOLS: &str = "!@#%^*-_=+";

/// Default generated password length.
pub const DEFAULT_PASSWORD_LEN: usize = 32;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Charset constraint an engine places on generated credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// Letters and digits only.
    Alphanumeric,
    /// Letters, digits, and exec-safe symbols.
    WithSymbols,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Generates a random username in `adjective_noun_NNN` format.
pub fn generate_username() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).unwrap();
    let noun = NOUNS.choose(&mut rng).unwrap();
    let n: u16 = rng.gen_range(0..1000);
    format!("{adjective}_{noun}_{n}")
}

/// Generates a random password of the default length under a charset
/// constraint.
pub fn generate_password(charset: Charset) -> String {
    generate_password_with_len(charset, DEFAULT_PASSWORD_LEN)
}

/// Generates a random password of `len` characters under a charset
/// constraint. Passwords with symbols always contain at least one character
/// of each class so engines with composition rules (e.g. SQL Server) accept
/// them.
pub fn generate_password_with_len(charset: Charset, len: usize) -> String {
    let mut rng = rand::thread_rng();
    let len = len.max(8);

    let pick = |set: &str, rng: &mut rand::rngs::ThreadRng| -> char {
        let bytes = set.as_bytes();
        bytes[rng.gen_range(0..bytes.len())] as char
    };

    let mut chars: Vec<char> = vec![
        pick(UPPER, &mut rng),
        pick(LOWER, &mut rng),
        pick(DIGITS, &mut rng),
    ];

    let alphabet: String = match charset {
        Charset::Alphanumeric => format!("{LOWER}{UPPER}{DIGITS}"),
        Charset::WithSymbols => {
            chars.push(pick(SYMBOLS, &mut rng));
            format!("{LOWER}{UPPER}{DIGITS}{SYMBOLS}")
        }
    };

    while chars.len() < len {
        chars.push(pick(&alphabet, &mut rng));
    }
    chars.shuffle(&mut rng);
    chars.into_iter().collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_shape() {
        for _ in 0..50 {
            let name = generate_username();
            let parts: Vec<&str> = name.split('_').collect();
            assert_eq!(parts.len(), 3);
            assert!(ADJECTIVES.contains(&parts[0]));
            assert!(NOUNS.contains(&parts[1]));
            assert!(parts[2].parse::<u16>().unwrap() < 1000);
        }
    }

    #[test]
    fn test_alphanumeric_passwords_have_no_symbols() {
        for _ in 0..50 {
            let password = generate_password(Charset::Alphanumeric);
            assert_eq!(password.len(), DEFAULT_PASSWORD_LEN);
            assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_symbol_passwords_satisfy_composition_rules() {
        for _ in 0..50 {
            let password = generate_password(Charset::WithSymbols);
            assert!(password.chars().any(|c| c.is_ascii_uppercase()));
            assert!(password.chars().any(|c| c.is_ascii_lowercase()));
            assert!(password.chars().any(|c| c.is_ascii_digit()));
            assert!(password.chars().any(|c| SYMBOLS.contains(c)));
        }
    }

    #[test]
    fn test_length_floor() {
        let password = generate_password_with_len(Charset::Alphanumeric, 4);
        assert_eq!(password.len(), 8);
    }
}
