//! Secret and code generation
//!
//! Tokens are 32 bytes from the OS RNG, hex encoded. Display and handoff
//! codes are 6 decimal digits with leading zeros kept.

use data_encoding::HEXLOWER;
use rand::rngs::OsRng;
use rand::RngCore;

/// Length in bytes of a session token before encoding
pub const TOKEN_BYTES: usize = 32;

/// Number of digits in session and handoff codes
pub const CODE_DIGITS: usize = 6;

const CODE_SPACE: u32 = 1_000_000;

/// Generate an unguessable session token (64 hex characters)
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    HEXLOWER.encode(&bytes)
}

/// Generate a 6-digit numeric code, e.g. `"004217"`
pub fn generate_numeric_code() -> String {
    // Rejection sampling keeps the distribution uniform
    let limit = u32::MAX - (u32::MAX % CODE_SPACE);
    loop {
        let value = OsRng.next_u32();
        if value < limit {
            return format!("{:0width$}", value % CODE_SPACE, width = CODE_DIGITS);
        }
    }
}

/// Whether `code` has the shape of a numeric code
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_DIGITS && code.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_token() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        let token2 = generate_token();
        assert_ne!(token, token2);
    }

    #[test]
    fn test_tokens_do_not_collide() {
        let tokens: HashSet<_> = (0..1000).map(|_| generate_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_generate_numeric_code() {
        for _ in 0..200 {
            let code = generate_numeric_code();
            assert!(is_valid_code(&code), "bad code {}", code);
        }
    }

    #[test]
    fn test_is_valid_code() {
        assert!(is_valid_code("483920"));
        assert!(is_valid_code("000001"));
        assert!(!is_valid_code("48392"));
        assert!(!is_valid_code("4839201"));
        assert!(!is_valid_code("48a920"));
        assert!(!is_valid_code(""));
    }
}
