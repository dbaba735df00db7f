//! One-time code derivation for stored two-factor secrets.
//!
//! Codes are HMAC-SHA1 over the 30-second window counter, dynamically
//! truncated and rendered in the upstream service's 5-character alphanumeric
//! alphabet (digits and consonants that cannot be misread).

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::SessionError;

type HmacSha1 = Hmac<Sha1>;

const CODE_CHARS: &[u8] = b"23456789BCDFGHJKMNPQRTVWXY";
const CODE_LEN: usize = 5;
const WINDOW_SECS: i64 = 30;

/// Derive the one-time code for `unix_time` from a base64 shared secret.
pub fn one_time_code(shared_secret: &str, unix_time: i64) -> Result<String, SessionError> {
    let secret = STANDARD.decode(shared_secret.trim())?;
    let counter = (unix_time / WINDOW_SECS) as u64;

    let mut mac = HmacSha1::new_from_slice(&secret)
        .map_err(|_| SessionError::Protocol("two-factor secret rejected by HMAC".to_string()))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation: low nibble of the last byte picks the 4-byte slice.
    let offset = (digest[19] & 0x0f) as usize;
    let mut value = u32::from_be_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]) & 0x7fff_ffff;

    let mut code = String::with_capacity(CODE_LEN);
    for _ in 0..CODE_LEN {
        code.push(CODE_CHARS[value as usize % CODE_CHARS.len()] as char);
        value /= CODE_CHARS.len() as u32;
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "REVBREJFRUZERUFEQkVFRg=="; // "DEADBEEFDEADBEEF"

    #[test]
    fn codes_use_the_restricted_alphabet() {
        let code = one_time_code(SECRET, 1_700_000_000).expect("code");
        assert_eq!(code.len(), CODE_LEN);
        assert!(code.bytes().all(|b| CODE_CHARS.contains(&b)));
    }

    #[test]
    fn codes_are_stable_within_a_window() {
        let window_start = 1_700_000_010 - (1_700_000_010 % WINDOW_SECS);
        let a = one_time_code(SECRET, window_start).expect("code");
        let b = one_time_code(SECRET, window_start + WINDOW_SECS - 1).expect("code");
        assert_eq!(a, b);
    }

    #[test]
    fn codes_are_deterministic_per_secret_and_time() {
        let a = one_time_code(SECRET, 1_700_000_000).expect("code");
        let b = one_time_code(SECRET, 1_700_000_000).expect("code");
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = one_time_code("not//valid!!", 1_700_000_000).expect_err("decode failure");
        assert!(matches!(err, SessionError::InvalidSecret(_)));
    }
}
